//! Source catalog: which granules a run needs.
//!
//! Locators are rendered from a template such as
//! `https://archive.example/{year}/{doy}/{hour}/OR_ABI-L2-CMIPF-M6{channel}_G16_s{year}{doy}{hour}{minute}.nc`.

use chrono::{DateTime, Datelike, Duration, Utc};
use sat_common::{SourceFileRef, TimeInterval};
use std::collections::HashSet;

use crate::error::{ConversionError, Result};

const PLACEHOLDERS: &[&str] = &[
    "channel", "date", "time", "datetime", "year", "month", "day", "hour", "minute", "doy",
];

/// Resolves a time interval and channel list into the source files to fetch.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    template: String,
}

impl SourceCatalog {
    /// Create a catalog, rejecting templates with unknown or unbalanced
    /// placeholders.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        for name in placeholders(&template)? {
            if !PLACEHOLDERS.contains(&name) {
                return Err(ConversionError::CatalogResolution(format!(
                    "unknown placeholder {{{}}} in template",
                    name
                )));
            }
        }
        Ok(Self { template })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Every (timestamp, channel) pair in the interval, ordered by timestamp
    /// and then by channel order. Duplicate channels are ignored.
    pub fn resolve(
        &self,
        interval: &TimeInterval,
        step: Duration,
        channels: &[String],
    ) -> Result<Vec<SourceFileRef>> {
        let channels = dedup_channels(channels)?;
        let timestamps = interval
            .nominal_timestamps(step)
            .map_err(|e| ConversionError::CatalogResolution(e.to_string()))?;

        let mut refs = Vec::with_capacity(timestamps.len() * channels.len());
        let mut seen = HashSet::new();
        for timestamp in timestamps {
            for channel in &channels {
                let locator = self.render(channel, timestamp);
                let identifier = locator
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                if identifier.is_empty() {
                    return Err(ConversionError::CatalogResolution(format!(
                        "template yields an empty identifier for {} at {}",
                        channel, timestamp
                    )));
                }
                if !seen.insert(identifier.clone()) {
                    return Err(ConversionError::CatalogResolution(format!(
                        "template yields duplicate identifier {}",
                        identifier
                    )));
                }
                refs.push(SourceFileRef {
                    identifier,
                    channel: channel.clone(),
                    timestamp,
                    locator,
                });
            }
        }

        Ok(refs)
    }

    fn render(&self, channel: &str, ts: DateTime<Utc>) -> String {
        self.template
            .replace("{channel}", channel)
            .replace("{datetime}", &ts.format("%Y%m%d%H%M%S").to_string())
            .replace("{date}", &ts.format("%Y%m%d").to_string())
            .replace("{time}", &ts.format("%H%M%S").to_string())
            .replace("{year}", &format!("{:04}", ts.year()))
            .replace("{month}", &ts.format("%m").to_string())
            .replace("{day}", &ts.format("%d").to_string())
            .replace("{hour}", &ts.format("%H").to_string())
            .replace("{minute}", &ts.format("%M").to_string())
            .replace("{doy}", &format!("{:03}", ts.ordinal()))
    }
}

fn placeholders(template: &str) -> Result<Vec<&str>> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            ConversionError::CatalogResolution(format!("unclosed placeholder in {}", template))
        })?;
        names.push(&after[..close]);
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(ConversionError::CatalogResolution(format!(
            "unbalanced braces in {}",
            template
        )));
    }
    Ok(names)
}

fn dedup_channels(channels: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for channel in channels {
        let channel = channel.trim();
        if channel.is_empty() {
            return Err(ConversionError::CatalogResolution(
                "channel names must not be empty".to_string(),
            ));
        }
        if seen.insert(channel.to_string()) {
            out.push(channel.to_string());
        }
    }
    if out.is_empty() {
        return Err(ConversionError::CatalogResolution(
            "at least one channel is required".to_string(),
        ));
    }
    Ok(out)
}
