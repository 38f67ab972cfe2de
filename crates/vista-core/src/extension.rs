use std::path::Path;

/// Image file types accepted for prediction and training uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageExtension {
    Png,
    Jpg,
    Jpeg,
    Gif,
    Bmp,
}

impl ImageExtension {
    /// Lowercase extension without the dot
    pub fn as_str(&self) -> &str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
        }
    }

    /// All accepted extensions
    pub fn all() -> [ImageExtension; 5] {
        [Self::Png, Self::Jpg, Self::Jpeg, Self::Gif, Self::Bmp]
    }

    /// Parse an extension, ignoring case and a leading dot
    pub fn parse(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Self::all().into_iter().find(|e| e.as_str() == ext)
    }

    /// Extension of a filename or path, if it is one we accept
    pub fn from_filename(filename: impl AsRef<Path>) -> Option<Self> {
        filename
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::parse)
    }

    /// Comma separated list for error messages
    pub fn allowed_list() -> String {
        Self::all()
            .iter()
            .map(|e| e.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// True when the filename carries an allowed image extension.
pub fn is_allowed(filename: impl AsRef<Path>) -> bool {
    ImageExtension::from_filename(filename).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_ids() {
        assert_eq!(ImageExtension::Jpeg.as_str(), "jpeg");
        assert_eq!(ImageExtension::parse(".PNG"), Some(ImageExtension::Png));
    }

    #[test]
    fn test_allowed_filenames() {
        assert!(is_allowed("leaf.JPG"));
        assert!(is_allowed("dir/sample.bmp"));
        assert!(!is_allowed("notes.txt"));
        assert!(!is_allowed("no_extension"));
        assert!(!is_allowed(".png.exe"));
    }

    #[test]
    fn test_all_extensions() {
        assert_eq!(ImageExtension::all().len(), 5);
        assert_eq!(ImageExtension::allowed_list(), "png, jpg, jpeg, gif, bmp");
    }
}
