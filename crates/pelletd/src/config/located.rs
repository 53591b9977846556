use std::ops::Deref;
use std::ops::Range;
use std::sync::Arc;

use serde::Deserialize;

use super::diagnostics::SourceInfo;

/// A config value together with the file and byte span it was read from.
///
/// Deserializes through `toml::Spanned<T>`; the source file is attached after
/// parsing, once the loader knows which file the value came from.
#[derive(Debug, Clone)]
pub struct Located<T> {
    value: T,
    span: Range<usize>,
    source: Option<Arc<SourceInfo>>,
}

impl<T> Located<T> {
    pub fn get_ref(&self) -> &T {
        &self.value
    }

    pub(crate) fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn span(&self) -> &Range<usize> {
        &self.span
    }

    pub fn source(&self) -> Option<&Arc<SourceInfo>> {
        self.source.as_ref()
    }

    pub(crate) fn set_source(&mut self, source: &Arc<SourceInfo>) {
        self.source = Some(source.clone());
    }
}

impl<T> Deref for Located<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<'de, T> Deserialize<'de> for Located<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let spanned = toml::Spanned::<T>::deserialize(deserializer)?;
        let span = spanned.span();

        Ok(Located {
            value: spanned.into_inner(),
            span,
            source: None,
        })
    }
}

impl<T: PartialEq> PartialEq for Located<T> {
    fn eq(&self, other: &Self) -> bool {
        // Location is metadata, only the value takes part in equality
        self.value == other.value
    }
}
