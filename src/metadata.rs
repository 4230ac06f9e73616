use crate::cpl::CslStringList;
use crate::errors::Result;

/// Metadata access for objects that carry `KEY=VALUE` metadata in named domains.
///
/// The default domain is the empty string.
///
/// See: [GDAL metadata model](https://gdal.org/user/raster_data_model.html#metadata)
pub trait Metadata {
    /// All items of `domain`.
    fn metadata(&self, domain: &str) -> Result<CslStringList>;

    /// Replaces the items of `domain`.
    fn set_metadata(&mut self, metadata: &CslStringList, domain: &str) -> Result<()>;

    /// A single item of `domain`, `None` when absent.
    fn metadata_item(&self, key: &str, domain: &str) -> Result<Option<String>>;

    /// Sets a single item of `domain`, keeping the others.
    fn set_metadata_item(&mut self, key: &str, value: &str, domain: &str) -> Result<()> {
        let mut metadata = self.metadata(domain)?;
        metadata.set_name_value(key, value)?;
        self.set_metadata(&metadata, domain)
    }
}
