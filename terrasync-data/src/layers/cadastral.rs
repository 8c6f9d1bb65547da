//! Danish cadastral properties (`SamletFastEjendom`) from Datafordeler.

use terrasync_core::{FieldMapping, LayerSchema};

use super::WfsLayer;

/// Current Datafordeler endpoint for the cadastral WFS.
pub const DEFAULT_ENDPOINT: &str =
    "https://wfs.datafordeler.dk/MATRIKLEN2/MatGaeldendeOgForeloebigWFS/1.0.0/WFS";

const FIELDS: &[FieldMapping] = &[
    FieldMapping::integer("BFEnummer", "bfe_number"),
    FieldMapping::text("forretningshaendelse", "business_event"),
    FieldMapping::text("forretningsproces", "business_process"),
    FieldMapping::text("senesteSagLokalId", "latest_case_id"),
    FieldMapping::text("id_lokalId", "id_local"),
    FieldMapping::text("id_namespace", "id_namespace"),
    FieldMapping::timestamp("registreringFra", "registration_from"),
    FieldMapping::timestamp("virkningFra", "effect_from"),
    FieldMapping::text("virkningsaktoer", "authority"),
    FieldMapping::boolean("arbejderbolig", "is_worker_housing"),
    FieldMapping::boolean("erFaelleslod", "is_common_lot"),
    FieldMapping::boolean("hovedejendomOpdeltIEjerlejligheder", "has_owner_apartments"),
    FieldMapping::boolean("udskiltVej", "is_separated_road"),
    FieldMapping::text("landbrugsnotering", "agricultural_notation"),
];

/// Cadastral properties in ETRS89 / UTM zone 32N, keyed by BFE number.
///
/// Overwrites are guarded by `registration_from`: the instant a version of
/// the property was registered.
pub const CADASTRAL: WfsLayer = WfsLayer {
    type_name: "mat:SamletFastEjendom_Gaeldende",
    feature_element: "SamletFastEjendom_Gaeldende",
    geometry_element: "geometri",
    schema: LayerSchema {
        table: "cadastral_properties",
        id_field: "bfe_number",
        version_field: "registration_from",
        srid: 25832,
        fields: FIELDS,
    },
};
