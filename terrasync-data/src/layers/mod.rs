//! Layer descriptions for the WFS services terrasync knows about.

mod cadastral;

pub use cadastral::{CADASTRAL, DEFAULT_ENDPOINT as CADASTRAL_ENDPOINT};

use terrasync_core::LayerSchema;

/// Binds a [`LayerSchema`] to the element names used by a WFS service.
#[derive(Debug, Clone, Copy)]
pub struct WfsLayer {
    /// Qualified feature type requested through `TYPENAMES`.
    pub type_name: &'static str,
    /// Local name of each feature element in a response.
    pub feature_element: &'static str,
    /// Local name of the property wrapping the feature's geometry.
    pub geometry_element: &'static str,
    /// Target table description.
    pub schema: LayerSchema,
}

impl WfsLayer {
    /// `SRSNAME` value requesting the layer's fixed spatial reference.
    #[must_use]
    pub fn srs_name(&self) -> String {
        format!("EPSG:{}", self.schema.srid)
    }
}
