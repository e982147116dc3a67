//! GOES ABI Level 2 Cloud and Moisture Imagery (CMIP) decoder.
//!
//! Reads the `CMI` variable, applies `scale_factor` / `add_offset`, maps
//! `_FillValue` to NaN, and takes the fixed-grid geometry from the `x` / `y`
//! scan-angle coordinates and `goes_imager_projection`.

use std::path::Path;

use sat_common::{
    DecodedChannelFrame, GeostationaryView, NativeGeolocation, SourceFileRef, Swath, SweepAxis,
};

use super::{DecodeFailure, InstrumentDecoder};

/// Decoder for GOES-16/17/18/19 ABI CMIP NetCDF granules.
#[derive(Debug, Default, Clone)]
pub struct GoesNetcdfDecoder;

impl InstrumentDecoder for GoesNetcdfDecoder {
    fn name(&self) -> &str {
        "goes-abi-cmip"
    }

    fn decode(
        &self,
        path: &Path,
        file: &SourceFileRef,
    ) -> Result<DecodedChannelFrame, DecodeFailure> {
        let expected_band = parse_band(&file.channel).ok_or_else(|| {
            DecodeFailure::MissingChannel(format!("{} is not an ABI band", file.channel))
        })?;

        let nc = netcdf::open(path)
            .map_err(|e| DecodeFailure::Corrupt(format!("Failed to open NetCDF: {}", e)))?;

        if let Some(band_var) = nc.variable("band_id") {
            let bands: Vec<i32> = band_var
                .get_values(..)
                .map_err(|e| DecodeFailure::Corrupt(format!("Failed to read band_id: {}", e)))?;
            if !bands.contains(&expected_band) {
                return Err(DecodeFailure::ModeMismatch(format!(
                    "granule carries band {:?}, expected {}",
                    bands, expected_band
                )));
            }
        }

        let cols = nc
            .dimension("x")
            .ok_or_else(|| DecodeFailure::Corrupt("x dimension".to_string()))?
            .len();
        let rows = nc
            .dimension("y")
            .ok_or_else(|| DecodeFailure::Corrupt("y dimension".to_string()))?
            .len();

        let cmi = nc
            .variable("CMI")
            .ok_or_else(|| DecodeFailure::MissingChannel("CMI variable".to_string()))?;
        let raw: Vec<i16> = cmi
            .get_values(..)
            .map_err(|e| DecodeFailure::Corrupt(format!("Failed to read CMI: {}", e)))?;

        let scale_factor = f32_attr(&cmi, "scale_factor").unwrap_or(1.0);
        let add_offset = f32_attr(&cmi, "add_offset").unwrap_or(0.0);
        let fill_value = i16_attr(&cmi, "_FillValue").unwrap_or(-1);
        let unsigned = str_attr(&cmi, "_Unsigned").is_some_and(|v| v == "true");
        let units = str_attr(&cmi, "units").unwrap_or_else(|| "1".to_string());

        let data: Vec<f32> = raw
            .iter()
            .map(|&val| {
                if val == fill_value {
                    f32::NAN
                } else if unsigned {
                    val as u16 as f32 * scale_factor + add_offset
                } else {
                    val as f32 * scale_factor + add_offset
                }
            })
            .collect();

        let (x_origin, dx) = coordinate(&nc, "x")?;
        let (y_origin, dy) = coordinate(&nc, "y")?;

        let proj = nc
            .variable("goes_imager_projection")
            .ok_or_else(|| DecodeFailure::Corrupt("goes_imager_projection variable".to_string()))?;
        let sweep = match str_attr(&proj, "sweep_angle_axis").as_deref() {
            Some("y") => SweepAxis::Y,
            _ => SweepAxis::X,
        };
        let view = GeostationaryView {
            longitude_origin: f64_attr(&proj, "longitude_of_projection_origin")
                .ok_or_else(|| DecodeFailure::Corrupt("longitude_of_projection_origin".into()))?,
            perspective_point_height: f64_attr(&proj, "perspective_point_height")
                .unwrap_or(35_786_023.0),
            semi_major_axis: f64_attr(&proj, "semi_major_axis").unwrap_or(6_378_137.0),
            semi_minor_axis: f64_attr(&proj, "semi_minor_axis").unwrap_or(6_356_752.31414),
            sweep,
        };

        let swath =
            Swath::new(rows, cols, data).map_err(|e| DecodeFailure::Corrupt(e.to_string()))?;

        Ok(DecodedChannelFrame {
            channel: file.channel.clone(),
            timestamp: file.timestamp,
            source: file.identifier.clone(),
            decoder: self.name().to_string(),
            units,
            geolocation: NativeGeolocation::Geostationary {
                view,
                x_origin,
                y_origin,
                dx,
                dy,
            },
            swath,
        })
    }
}

/// `C13`, `c13` or `13` → 13.
fn parse_band(channel: &str) -> Option<i32> {
    let digits = channel.trim_start_matches(['C', 'c']);
    let band: i32 = digits.parse().ok()?;
    (1..=16).contains(&band).then_some(band)
}

/// Origin and spacing of a packed scan-angle coordinate (radians).
fn coordinate(nc: &netcdf::File, name: &str) -> Result<(f64, f64), DecodeFailure> {
    let var = nc
        .variable(name)
        .ok_or_else(|| DecodeFailure::Corrupt(format!("{} variable", name)))?;
    let scale = f32_attr(&var, "scale_factor")
        .ok_or_else(|| DecodeFailure::Corrupt(format!("{}:scale_factor", name)))?
        as f64;
    let offset = f32_attr(&var, "add_offset")
        .ok_or_else(|| DecodeFailure::Corrupt(format!("{}:add_offset", name)))?
        as f64;
    let packed: Vec<i16> = var
        .get_values(..)
        .map_err(|e| DecodeFailure::Corrupt(format!("Failed to read {}: {}", name, e)))?;
    let first = packed
        .first()
        .copied()
        .ok_or_else(|| DecodeFailure::Corrupt(format!("{} is empty", name)))? as f64;
    Ok((offset + first * scale, scale))
}

fn has_attr(var: &netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

fn f32_attr(var: &netcdf::Variable, name: &str) -> Option<f32> {
    if !has_attr(var, name) {
        return None;
    }
    let value = var.attribute_value(name)?.ok()?;
    f32::try_from(value).ok()
}

fn i16_attr(var: &netcdf::Variable, name: &str) -> Option<i16> {
    if !has_attr(var, name) {
        return None;
    }
    let value = var.attribute_value(name)?.ok()?;
    i16::try_from(value).ok()
}

fn f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    if !has_attr(var, name) {
        return None;
    }
    let value = var.attribute_value(name)?.ok()?;
    f64::try_from(value).ok()
}

fn str_attr(var: &netcdf::Variable, name: &str) -> Option<String> {
    if !has_attr(var, name) {
        return None;
    }
    match var.attribute_value(name)?.ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_band() {
        assert_eq!(parse_band("C13"), Some(13));
        assert_eq!(parse_band("c02"), Some(2));
        assert_eq!(parse_band("7"), Some(7));
        assert_eq!(parse_band("C17"), None);
        assert_eq!(parse_band("IR_108"), None);
    }

    #[test]
    fn test_decode_real_granule() {
        let path = test_utils::require_test_file!(
            "OR_ABI-L2-CMIPF-M6C13_G16_s20241211800214_e20241211809522_c20241211809591.nc"
        );
        let file = SourceFileRef {
            identifier: "granule".to_string(),
            channel: "C13".to_string(),
            timestamp: chrono::Utc.with_ymd_and_hms(2024, 4, 30, 18, 0, 0).unwrap(),
            locator: path.display().to_string(),
        };

        let frame = GoesNetcdfDecoder.decode(&path, &file).unwrap();
        assert!(frame.swath.rows() > 0);
        assert!(frame.swath.data().iter().any(|v| v.is_finite()));
        assert!(matches!(
            frame.geolocation,
            NativeGeolocation::Geostationary { .. }
        ));
    }
}
