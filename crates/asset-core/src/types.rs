//! Wire-facing data types for processed uploads.

use serde::{Deserialize, Serialize};

/// One stored rendition size: a width/height pair and the output formats
/// present at that size.
///
/// On disk this corresponds to the `<width>x<height>` subfolder of a
/// digest folder, holding one `<filename>.<format>` file per listed
/// format. Format lists are kept sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSpec {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels, derived from the original aspect ratio
    pub height: u32,

    /// Output format names ("jpg", "webp", ...)
    pub formats: Vec<String>,
}

impl DimensionSpec {
    /// Parse a `WxH` folder name into a spec with no formats yet.
    pub fn from_folder_name(name: &str) -> Option<Self> {
        let (width, height) = name.split_once('x')?;
        Some(Self {
            width: width.parse().ok()?,
            height: height.parse().ok()?,
            formats: Vec::new(),
        })
    }

    /// The `WxH` folder name for this spec.
    pub fn folder_name(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// The complete result of ingesting one upload.
///
/// Serialized as-is as the 200 response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Content digest: 32 lowercase hex characters, also the folder name
    pub hash: String,

    /// Sanitized filename stem shared by every stored file
    pub filename: String,

    /// Original dimensions; `formats` holds exactly the detected input format
    pub original: DimensionSpec,

    /// Resized renditions, ordered by ascending width
    pub variants: Vec<DimensionSpec>,

    /// False when the upload was already present and served from storage
    pub is_new: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_name_roundtrip() {
        let spec = DimensionSpec {
            width: 640,
            height: 427,
            formats: vec![],
        };
        assert_eq!(spec.folder_name(), "640x427");
        assert_eq!(DimensionSpec::from_folder_name("640x427").unwrap(), spec);
    }

    #[test]
    fn test_from_folder_name_rejects_garbage() {
        assert!(DimensionSpec::from_folder_name("640").is_none());
        assert!(DimensionSpec::from_folder_name("640x").is_none());
        assert!(DimensionSpec::from_folder_name("ax427").is_none());
    }

    #[test]
    fn test_upload_record_json_shape() {
        let record = UploadRecord {
            hash: "ab".repeat(16),
            filename: "photo".to_string(),
            original: DimensionSpec {
                width: 1000,
                height: 500,
                formats: vec!["jpeg".to_string()],
            },
            variants: vec![DimensionSpec {
                width: 100,
                height: 50,
                formats: vec!["jpg".to_string(), "webp".to_string()],
            }],
            is_new: true,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["hash"].as_str().unwrap().len(), 32);
        assert_eq!(json["original"]["formats"][0], "jpeg");
        assert_eq!(json["variants"][0]["width"], 100);
        assert_eq!(json["is_new"], true);
    }
}
