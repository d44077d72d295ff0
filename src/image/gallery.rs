//! Resolving user image selections to decoded sources.

use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rand::Rng;

use crate::error::{Error, Result};
use crate::model::fetch_bytes;

use super::ImageSource;

/// What the user picked for an image slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// A local file.
    File(PathBuf),
    /// A bundled gallery image, by name (`<gallery>/<name>.jpg`).
    Gallery(String),
    /// A remote image.
    Url(String),
    /// A random entry from the gallery's link list.
    Random,
}

impl Selection {
    /// Interpret a selector value.
    ///
    /// `random`, `http(s)://...` and `file:<path>` are recognized explicitly;
    /// anything with an extension or a path separator is a file, the rest are
    /// gallery names.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "random" {
            return Self::Random;
        }
        if value.starts_with("http://") || value.starts_with("https://") {
            return Self::Url(value.to_string());
        }
        if let Some(path) = value.strip_prefix("file:") {
            return Self::File(PathBuf::from(path));
        }

        let path = Path::new(value);
        if path.extension().is_some() || path.components().count() > 1 {
            Self::File(path.to_path_buf())
        } else {
            Self::Gallery(value.to_string())
        }
    }
}

impl FromStr for Selection {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Bundled images plus the link list used for random picks.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    image_dir: PathBuf,
    links: Vec<String>,
}

impl Gallery {
    pub fn new(image_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            links: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_links(mut self, links: Vec<String>) -> Self {
        self.links = links;
        self
    }

    /// Read a link list: one URL or path per line, `#` starts a comment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_links<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let contents = fs::read_to_string(path)?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    #[must_use]
    pub fn links(&self) -> &[String] {
        &self.links
    }

    /// Path of a named gallery image.
    #[must_use]
    pub fn gallery_path(&self, name: &str) -> PathBuf {
        self.image_dir.join(format!("{name}.jpg"))
    }

    /// Decode the image for `selection`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImageDecode`] naming the source if it fails to decode,
    /// [`Error::Download`] if a URL cannot be fetched, or
    /// [`Error::InvalidParameter`] for `random` with no links.
    pub fn resolve<R: Rng>(&self, selection: &Selection, rng: &mut R) -> Result<ImageSource> {
        match selection {
            Selection::File(path) => ImageSource::open(path),
            Selection::Gallery(name) => ImageSource::open(self.gallery_path(name)),
            Selection::Url(url) => ImageSource::from_bytes(url.as_str(), &fetch_bytes(url)?),
            Selection::Random => {
                let link = self.random_link(rng)?;
                tracing::debug!("Random pick: {link}");
                match Selection::parse(link) {
                    Selection::Random => Err(invalid_link(link)),
                    picked => self.resolve(&picked, rng),
                }
            }
        }
    }

    fn random_link<R: Rng>(&self, rng: &mut R) -> Result<&str> {
        if self.links.is_empty() {
            return Err(Error::InvalidParameter {
                name: "random".to_string(),
                reason: "the gallery has no links to pick from".to_string(),
            });
        }
        Ok(&self.links[rng.random_range(0..self.links.len())])
    }
}

fn invalid_link(link: &str) -> Error {
    Error::InvalidParameter {
        name: "links".to_string(),
        reason: format!("`{link}` is not an image location"),
    }
}
