//! Structural inspection of FIT files.
//!
//! [`DecodingInspector`] decodes the file and reads the producer fields of
//! the `file_id` message. When those name neither simulator, or the file
//! does not decode, it falls back to [`MarkerInspector`], which searches the
//! raw data section for configured byte markers (developer-field
//! application names, device strings).

use fitparser::profile::MesgNum;
use fitparser::{FitDataRecord, Value};
use std::fs;
use std::path::Path;

use crate::activity::SourceTag;
use crate::error::InspectError;
use crate::settings::MarkerSettings;

/// FIT signature stored at bytes 8..12 of the header
const FIT_SIGNATURE: &[u8; 4] = b".FIT";

/// Producer markers found inside a file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentCues {
    pub simulator_a: bool,
    pub simulator_b: bool,
}

impl ContentCues {
    /// The producer the cues point to, `None` when absent or contradictory
    pub fn verdict(&self) -> Option<SourceTag> {
        match (self.simulator_a, self.simulator_b) {
            (true, false) => Some(SourceTag::SimulatorA),
            (false, true) => Some(SourceTag::SimulatorB),
            _ => None,
        }
    }
}

/// Read-only structural introspection of activity files
pub trait FitInspector: Send + Sync {
    fn inspect(&self, path: &Path) -> Result<ContentCues, InspectError>;
}

/// Producer details read from decoded FIT messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FitEvidence {
    /// Manufacturer, product and product name from `file_id`, as decoded text
    pub producer: Vec<String>,
    /// Sub sport of the first `session` message
    pub sub_sport: Option<String>,
}

impl FitEvidence {
    pub fn from_records(records: &[FitDataRecord]) -> Self {
        let mut evidence = Self::default();

        for record in records {
            match record.kind() {
                MesgNum::FileId => {
                    for field in record.fields() {
                        let name = field.name();
                        let is_producer = name == "manufacturer"
                            || name == "product"
                            || name == "product_name"
                            || name.ends_with("_product");
                        if let (true, Some(text)) = (is_producer, text_of(field.value())) {
                            evidence.producer.push(text);
                        }
                    }
                }
                MesgNum::Session if evidence.sub_sport.is_none() => {
                    evidence.sub_sport = record
                        .fields()
                        .iter()
                        .find(|field| field.name() == "sub_sport")
                        .and_then(|field| text_of(field.value()));
                }
                _ => {}
            }
        }

        evidence
    }

    /// Which producers the decoded fields name
    ///
    /// Names are compared ignoring case and anything that is not a letter or
    /// digit, so `indie_velo` matches the name `indieVelo`.
    pub fn cues(&self, simulator_a: &[String], simulator_b: &[String]) -> ContentCues {
        let producer: Vec<String> = self.producer.iter().map(|t| normalize(t)).collect();
        let names_any = |names: &[String]| {
            names
                .iter()
                .any(|name| producer.iter().any(|text| text.contains(name.as_str())))
        };

        ContentCues {
            simulator_a: names_any(simulator_a),
            simulator_b: names_any(simulator_b),
        }
    }
}

/// Inspector that decodes the FIT file and reads its producer fields
///
/// Files whose producer fields are inconclusive, and files the decoder
/// rejects, are handed to a [`MarkerInspector`] built from the same names.
#[derive(Debug, Clone)]
pub struct DecodingInspector {
    simulator_a: Vec<String>,
    simulator_b: Vec<String>,
    fallback: MarkerInspector,
}

impl Default for DecodingInspector {
    fn default() -> Self {
        Self::from_settings(&MarkerSettings::default())
    }
}

impl DecodingInspector {
    pub fn from_settings(markers: &MarkerSettings) -> Self {
        let names = |markers: &[String]| -> Vec<String> {
            markers
                .iter()
                .map(|m| normalize(m))
                .filter(|m| !m.is_empty())
                .collect()
        };
        Self {
            simulator_a: names(&markers.simulator_a),
            simulator_b: names(&markers.simulator_b),
            fallback: MarkerInspector::from_settings(markers),
        }
    }

    pub fn inspect_bytes(&self, bytes: &[u8]) -> Result<ContentCues, InspectError> {
        match fitparser::from_bytes(bytes) {
            Ok(records) => {
                let evidence = FitEvidence::from_records(&records);
                let cues = evidence.cues(&self.simulator_a, &self.simulator_b);
                log::debug!(
                    "Decoded producer {:?}, sub sport {:?}",
                    evidence.producer,
                    evidence.sub_sport
                );
                if cues.simulator_a || cues.simulator_b {
                    return Ok(cues);
                }
            }
            Err(e) => log::debug!("FIT decoding failed, searching markers instead: {e}"),
        }

        self.fallback.inspect_bytes(bytes)
    }
}

impl FitInspector for DecodingInspector {
    fn inspect(&self, path: &Path) -> Result<ContentCues, InspectError> {
        let bytes = fs::read(path)?;
        self.inspect_bytes(&bytes)
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        _ => None,
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Inspector that matches configured byte markers in the FIT data section
#[derive(Debug, Clone)]
pub struct MarkerInspector {
    simulator_a: Vec<Vec<u8>>,
    simulator_b: Vec<Vec<u8>>,
}

impl Default for MarkerInspector {
    fn default() -> Self {
        Self::from_settings(&MarkerSettings::default())
    }
}

impl MarkerInspector {
    pub fn new<A, B>(simulator_a: A, simulator_b: B) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<[u8]>,
        B: IntoIterator,
        B::Item: AsRef<[u8]>,
    {
        let collect = |markers: Vec<Vec<u8>>| -> Vec<Vec<u8>> {
            markers.into_iter().filter(|m| !m.is_empty()).collect()
        };
        Self {
            simulator_a: collect(simulator_a.into_iter().map(|m| m.as_ref().to_vec()).collect()),
            simulator_b: collect(simulator_b.into_iter().map(|m| m.as_ref().to_vec()).collect()),
        }
    }

    pub fn from_settings(markers: &MarkerSettings) -> Self {
        Self::new(&markers.simulator_a, &markers.simulator_b)
    }

    /// Cues found in an in-memory FIT file
    pub fn inspect_bytes(&self, bytes: &[u8]) -> Result<ContentCues, InspectError> {
        let data = data_section(bytes)?;
        Ok(ContentCues {
            simulator_a: contains_any(data, &self.simulator_a),
            simulator_b: contains_any(data, &self.simulator_b),
        })
    }
}

impl FitInspector for MarkerInspector {
    fn inspect(&self, path: &Path) -> Result<ContentCues, InspectError> {
        let bytes = fs::read(path)?;
        self.inspect_bytes(&bytes)
    }
}

/// Validate the FIT header and return the record data it announces
///
/// A data size running past the end of the file is clamped, since simulators
/// sometimes leave the header size stale.
fn data_section(bytes: &[u8]) -> Result<&[u8], InspectError> {
    if bytes.len() < 12 {
        return Err(InspectError::NotFit {
            reason: format!("{} bytes is shorter than a FIT header", bytes.len()),
        });
    }

    let header_size = usize::from(bytes[0]);
    if header_size != 12 && header_size != 14 {
        return Err(InspectError::NotFit {
            reason: format!("unexpected header size {header_size}"),
        });
    }

    if &bytes[8..12] != FIT_SIGNATURE {
        return Err(InspectError::NotFit {
            reason: "missing .FIT signature".to_string(),
        });
    }

    if bytes.len() < header_size {
        return Err(InspectError::NotFit {
            reason: "truncated header".to_string(),
        });
    }

    let data_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let end = header_size.saturating_add(data_size).min(bytes.len());
    Ok(&bytes[header_size..end])
}

fn contains_any(haystack: &[u8], needles: &[Vec<u8>]) -> bool {
    needles.iter().any(|needle| {
        needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle.as_slice())
    })
}

/// Assemble a minimal FIT byte stream around `payload` (test fixtures)
#[cfg(test)]
pub(crate) fn fit_bytes(payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(14 + payload.len() + 2);
    bytes.push(14);
    bytes.push(0x20);
    bytes.extend_from_slice(&2132u16.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(FIT_SIGNATURE);
    bytes.extend_from_slice(&[0, 0]);
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&[0, 0]);
    bytes
}

/// Encode a small activity file: `file_id` with the given manufacturer and
/// product name, then a cycling `session` with `sub_sport` (test fixtures)
#[cfg(test)]
pub(crate) fn encoded_fit(manufacturer: u16, product_name: &str, sub_sport: u8) -> Vec<u8> {
    let mut name = product_name.as_bytes().to_vec();
    name.push(0);

    let mut records = Vec::new();
    // Definition, local 0: file_id with type, manufacturer, product, product_name
    records.extend_from_slice(&[0x40, 0, 0]);
    records.extend_from_slice(&0u16.to_le_bytes());
    records.extend_from_slice(&[4, 0, 1, 0x00, 1, 2, 0x84, 2, 2, 0x84, 8, name.len() as u8, 0x07]);
    records.push(0x00);
    records.push(4);
    records.extend_from_slice(&manufacturer.to_le_bytes());
    records.extend_from_slice(&1u16.to_le_bytes());
    records.extend_from_slice(&name);
    // Definition, local 1: session with sport and sub_sport
    records.extend_from_slice(&[0x41, 0, 0]);
    records.extend_from_slice(&18u16.to_le_bytes());
    records.extend_from_slice(&[2, 5, 1, 0x00, 6, 1, 0x00]);
    records.extend_from_slice(&[0x01, 2, sub_sport]);

    let mut bytes = vec![14, 0x20];
    bytes.extend_from_slice(&2132u16.to_le_bytes());
    bytes.extend_from_slice(&(records.len() as u32).to_le_bytes());
    bytes.extend_from_slice(FIT_SIGNATURE);
    let header_crc = fit_crc(&bytes);
    bytes.extend_from_slice(&header_crc.to_le_bytes());
    bytes.extend_from_slice(&records);
    let file_crc = fit_crc(&bytes);
    bytes.extend_from_slice(&file_crc.to_le_bytes());
    bytes
}

#[cfg(test)]
fn fit_crc(bytes: &[u8]) -> u16 {
    const TABLE: [u16; 16] = [
        0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800,
        0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
    ];
    bytes.iter().fold(0u16, |crc, &byte| {
        let tmp = TABLE[usize::from(crc & 0xF)];
        let crc = ((crc >> 4) & 0x0FFF) ^ tmp ^ TABLE[usize::from(byte & 0xF)];
        let tmp = TABLE[usize::from(crc & 0xF)];
        ((crc >> 4) & 0x0FFF) ^ tmp ^ TABLE[usize::from(byte >> 4)]
    })
}
