//! Deterministic lead scoring.
//!
//! A [`BehavioralRecord`] is reduced to a bounded score in `0..=10`, a
//! [`LeadType`] bucket and a lost flag. Nothing here can fail: missing fields
//! deserialize to zero/false and an empty record classifies as a disengaged,
//! not-lost lead.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

pub const MAX_SCORE: u8 = 10;

const PRODUCT_VIEW_POINTS: i64 = 2;
const PDF_OPEN_POINTS: i64 = 3;
const ENGAGED_TIME_SECONDS: u64 = 180;
const ENGAGED_TIME_POINTS: i64 = 3;
const DEEP_SCROLL_PERCENT: f64 = 80.0;
const DEEP_SCROLL_POINTS: i64 = 2;
const INQUIRY_FORM_POINTS: i64 = 4;
const BOUNCE_PENALTY: i64 = 1;

const HOT_THRESHOLD: u8 = 9;
const WARM_THRESHOLD: u8 = 6;
const COLD_THRESHOLD: u8 = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BehavioralRecord {
    pub products_viewed: u32,
    pub pdfs_opened: u32,
    pub time_on_site_seconds: u64,
    pub scroll_depth: f64,
    pub reached_inquiry_form: bool,
    pub bounced_within_15s: bool,
    #[serde(alias = "exitOnFormStep")]
    pub exited_on_form_step: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadType {
    Hot,
    Warm,
    Cold,
    Disengaged,
}

impl LeadType {
    pub const ALL: [LeadType; 4] = [
        LeadType::Hot,
        LeadType::Warm,
        LeadType::Cold,
        LeadType::Disengaged,
    ];

    pub fn from_score(score: u8) -> Self {
        if score >= HOT_THRESHOLD {
            LeadType::Hot
        } else if score >= WARM_THRESHOLD {
            LeadType::Warm
        } else if score >= COLD_THRESHOLD {
            LeadType::Cold
        } else {
            LeadType::Disengaged
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadType::Hot => "Hot",
            LeadType::Warm => "Warm",
            LeadType::Cold => "Cold",
            LeadType::Disengaged => "Disengaged",
        }
    }
}

impl fmt::Display for LeadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(LeadType::Hot),
            "warm" => Ok(LeadType::Warm),
            "cold" => Ok(LeadType::Cold),
            "disengaged" => Ok(LeadType::Disengaged),
            _ => Err(AppError::Config(format!("invalid lead type: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeadClassification {
    pub score: u8,
    #[serde(rename = "type")]
    pub lead_type: LeadType,
    pub lost: bool,
}

pub fn score(record: &BehavioralRecord) -> u8 {
    let mut total = 0_i64;
    total += i64::from(record.products_viewed) * PRODUCT_VIEW_POINTS;
    total += i64::from(record.pdfs_opened) * PDF_OPEN_POINTS;
    if record.time_on_site_seconds >= ENGAGED_TIME_SECONDS {
        total += ENGAGED_TIME_POINTS;
    }
    // NaN compares false, so a garbage depth simply earns nothing.
    if record.scroll_depth >= DEEP_SCROLL_PERCENT {
        total += DEEP_SCROLL_POINTS;
    }
    if record.reached_inquiry_form {
        total += INQUIRY_FORM_POINTS;
    }
    if record.bounced_within_15s {
        total -= BOUNCE_PENALTY;
    }
    total.clamp(0, i64::from(MAX_SCORE)) as u8
}

/// High intent visitor who walked away on the form step without reaching the
/// inquiry form itself.
pub fn is_lost(record: &BehavioralRecord, score: u8) -> bool {
    score >= WARM_THRESHOLD && !record.reached_inquiry_form && record.exited_on_form_step
}

pub fn classify(record: &BehavioralRecord) -> LeadClassification {
    let score = score(record);
    LeadClassification {
        score,
        lead_type: LeadType::from_score(score),
        lost: is_lost(record, score),
    }
}
