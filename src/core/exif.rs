use crate::database::models::ExifData;
use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{Exif, In, Reader, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExifError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("EXIF parsing error: {0}")]
    Parse(#[from] exif::Error),
}

/// Extracts the EXIF subset the engine cares about: capture time, camera,
/// lens, ISO, aperture and shutter speed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifService;

impl ExifService {
    pub fn new() -> Self {
        Self
    }

    /// `Ok(None)` when the file has no EXIF block or none of the tracked tags.
    pub fn extract_exif(&self, file_path: &Path) -> Result<Option<ExifData>, ExifError> {
        let file = File::open(file_path)?;
        let mut reader = BufReader::new(file);

        let exif = match Reader::new().read_from_container(&mut reader) {
            Ok(exif) => exif,
            Err(exif::Error::NotFound(_)) | Err(exif::Error::InvalidFormat(_)) => return Ok(None),
            Err(e) => return Err(ExifError::Parse(e)),
        };

        let data = Self::collect(&exif);
        Ok(if data.is_empty() { None } else { Some(data) })
    }

    fn collect(exif: &Exif) -> ExifData {
        let field = move |tag: Tag| exif.get_field(tag, In::PRIMARY).map(|f| &f.value);

        let taken_at = field(Tag::DateTimeOriginal)
            .or_else(|| field(Tag::DateTime))
            .and_then(field_to_string)
            .and_then(|s| parse_exif_datetime(&s));

        let camera_parts: Vec<String> = [Tag::Make, Tag::Model]
            .into_iter()
            .filter_map(|tag| field(tag).and_then(field_to_string))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let camera = (!camera_parts.is_empty()).then(|| camera_parts.join(" "));

        let lens = field(Tag::LensModel)
            .or_else(|| field(Tag::LensMake))
            .and_then(field_to_string);

        let iso = field(Tag::PhotographicSensitivity)
            .or_else(|| field(Tag::ISOSpeed))
            .and_then(field_to_u32);

        let aperture = field(Tag::FNumber).and_then(field_to_f32);

        let shutter_speed = field(Tag::ExposureTime).map(|v| v.display_as(Tag::ExposureTime).to_string());

        ExifData {
            taken_at,
            camera,
            lens,
            iso,
            aperture,
            shutter_speed,
        }
    }
}

fn field_to_string(value: &Value) -> Option<String> {
    let raw = match value {
        Value::Ascii(parts) => parts.first().map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
        Value::Undefined(bytes, _) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }?;
    let trimmed = raw.trim_end_matches('\0').trim().to_string();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn field_to_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Short(v) => v.first().map(|&n| n as u32),
        Value::Long(v) => v.first().copied(),
        Value::Ascii(_) => field_to_string(value).and_then(|s| s.parse().ok()),
        _ => None,
    }
}

fn field_to_f32(value: &Value) -> Option<f32> {
    match value {
        Value::Rational(v) => v
            .first()
            .filter(|r| r.denom != 0)
            .map(|r| r.num as f32 / r.denom as f32),
        Value::SRational(v) => v
            .first()
            .filter(|r| r.denom != 0)
            .map(|r| r.num as f32 / r.denom as f32),
        _ => None,
    }
}

/// EXIF datetimes look like `YYYY:MM:DD HH:MM:SS` and carry no zone; they are read as UTC.
fn parse_exif_datetime(datetime_str: &str) -> Option<DateTime<Utc>> {
    let parsed = NaiveDateTime::parse_from_str(datetime_str, "%Y:%m:%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S"));
    match parsed {
        Ok(dt) => Some(dt.and_utc()),
        Err(_) => {
            log::warn!("Failed to parse EXIF datetime: {}", datetime_str);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_io_error() {
        let service = ExifService::new();
        let result = service.extract_exif(Path::new("/non/existent/file.jpg"));
        assert!(matches!(result, Err(ExifError::Io(_))));
    }

    #[test]
    fn test_file_without_exif() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("no_exif.jpg");
        fs::write(&file_path, b"This is not an image file").unwrap();

        let service = ExifService::new();
        assert!(service.extract_exif(&file_path).unwrap_or(None).is_none());
    }

    #[test]
    fn test_png_without_exif() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("plain.png");
        image::RgbImage::new(8, 8).save(&file_path).unwrap();

        let service = ExifService::new();
        assert!(service.extract_exif(&file_path).unwrap_or(None).is_none());
    }

    #[test]
    fn test_parse_exif_datetime() {
        use chrono::{Datelike, Timelike};

        let parsed = parse_exif_datetime("2023:12:25 14:30:45").unwrap();
        assert_eq!(parsed.year(), 2023);
        assert_eq!(parsed.month(), 12);
        assert_eq!(parsed.day(), 25);
        assert_eq!(parsed.hour(), 14);
        assert_eq!(parsed.minute(), 30);
        assert_eq!(parsed.second(), 45);

        assert!(parse_exif_datetime("not a date").is_none());
    }

    #[test]
    fn test_ascii_field_trims_nul_padding() {
        let value = Value::Ascii(vec![b"Canon\0\0".to_vec()]);
        assert_eq!(field_to_string(&value).as_deref(), Some("Canon"));
        assert_eq!(field_to_u32(&Value::Short(vec![400])), Some(400));
    }
}
