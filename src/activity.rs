use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, FixedOffset, TimeZone, Timelike};
use gpx::{Gpx, read};

use crate::error::{Result, UploaderError};

/// Strava activity types the uploader can assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityType {
    Ride,
    Run,
    Walk,
    Hike,
    Swim,
    AlpineSki,
    NordicSki,
    Kayaking,
    Canoeing,
    Rowing,
    Yoga,
    WeightTraining,
    Workout,
}

// Names written by the companion app (German locale) and the generic English
// names some exporters use. Matched case-insensitively.
const ACTIVITY_NAMES: &[(&str, ActivityType)] = &[
    ("radfahren im freien", ActivityType::Ride),
    ("radfahren", ActivityType::Ride),
    ("mountainbiken", ActivityType::Ride),
    ("gehen", ActivityType::Walk),
    ("laufen", ActivityType::Run),
    ("laufen im freien", ActivityType::Run),
    ("wandern", ActivityType::Hike),
    ("schwimmen", ActivityType::Swim),
    ("kajakfahren", ActivityType::Kayaking),
    ("kanufahren", ActivityType::Canoeing),
    ("rudern", ActivityType::Rowing),
    ("skifahren", ActivityType::AlpineSki),
    ("skilanglauf", ActivityType::NordicSki),
    ("yoga", ActivityType::Yoga),
    ("krafttraining", ActivityType::WeightTraining),
    ("running", ActivityType::Run),
    ("cycling", ActivityType::Ride),
    ("mountain biking", ActivityType::Ride),
    ("hiking", ActivityType::Hike),
    ("walking", ActivityType::Walk),
    ("swimming", ActivityType::Swim),
    ("downhill skiing", ActivityType::AlpineSki),
];

impl ActivityType {
    /// Unknown names fall back to [`ActivityType::Workout`].
    pub fn from_raw_name(raw_name: &str) -> Self {
        let needle = raw_name.trim().to_lowercase();
        ACTIVITY_NAMES
            .iter()
            .find(|(name, _)| *name == needle)
            .map(|(_, activity_type)| *activity_type)
            .unwrap_or(ActivityType::Workout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Ride => "Ride",
            ActivityType::Run => "Run",
            ActivityType::Walk => "Walk",
            ActivityType::Hike => "Hike",
            ActivityType::Swim => "Swim",
            ActivityType::AlpineSki => "AlpineSki",
            ActivityType::NordicSki => "NordicSki",
            ActivityType::Kayaking => "Kayaking",
            ActivityType::Canoeing => "Canoeing",
            ActivityType::Rowing => "Rowing",
            ActivityType::Yoga => "Yoga",
            ActivityType::WeightTraining => "WeightTraining",
            ActivityType::Workout => "Workout",
        }
    }

    /// Value for the `activity_type` field of the uploads endpoint.
    pub fn api_name(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOfDay {
    Morning,
    Lunch,
    Afternoon,
    Evening,
    Night,
}

impl PartOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=10 => PartOfDay::Morning,
            11..=13 => PartOfDay::Lunch,
            14..=17 => PartOfDay::Afternoon,
            18..=21 => PartOfDay::Evening,
            _ => PartOfDay::Night,
        }
    }
}

impl fmt::Display for PartOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartOfDay::Morning => "Morning",
            PartOfDay::Lunch => "Lunch",
            PartOfDay::Afternoon => "Afternoon",
            PartOfDay::Evening => "Evening",
            PartOfDay::Night => "Night",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityMetadata {
    /// Name exactly as recorded in the track, used as the description.
    pub raw_name: String,
    /// Upload title, e.g. "Morning Ride".
    pub display_name: String,
    pub activity_type: ActivityType,
}

pub fn extract_metadata<Tz: TimeZone>(path: &Path, tz: &Tz) -> Result<ActivityMetadata> {
    let file = File::open(path).map_err(|e| parse_error(path, e))?;
    metadata_from_reader(BufReader::new(file), tz).map_err(|reason| parse_error(path, reason))
}

fn metadata_from_reader<R: Read, Tz: TimeZone>(
    reader: R,
    tz: &Tz,
) -> std::result::Result<ActivityMetadata, String> {
    let gpx: Gpx = read(reader).map_err(|e| e.to_string())?;

    let raw_name = gpx
        .metadata
        .as_ref()
        .and_then(|m| m.name.clone())
        .or_else(|| gpx.tracks.iter().find_map(|t| t.name.clone()))
        .ok_or_else(|| "no <name> element found".to_string())?;

    let activity_type = ActivityType::from_raw_name(&raw_name);
    let display_name = match first_point_time(&gpx)? {
        Some(start) => {
            let part_of_day = PartOfDay::from_hour(start.with_timezone(tz).hour());
            format!("{part_of_day} {activity_type}")
        }
        None => raw_name.clone(),
    };

    Ok(ActivityMetadata {
        raw_name,
        display_name,
        activity_type,
    })
}

fn first_point_time(gpx: &Gpx) -> std::result::Result<Option<DateTime<FixedOffset>>, String> {
    let Some(time) = gpx
        .tracks
        .first()
        .and_then(|t| t.segments.first())
        .and_then(|s| s.points.iter().find_map(|p| p.time.as_ref()))
    else {
        return Ok(None);
    };

    let formatted = time.format().map_err(|e| e.to_string())?;
    DateTime::parse_from_rfc3339(&formatted)
        .map(Some)
        .map_err(|e| format!("invalid track point time `{formatted}`: {e}"))
}

fn parse_error(path: &Path, reason: impl ToString) -> UploaderError {
    UploaderError::Parse {
        file: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
