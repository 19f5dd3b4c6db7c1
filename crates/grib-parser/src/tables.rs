//! GRIB1/GRIB2 parameter and level lookup tables.
//!
//! Translates numeric codes into the short names used to build variable
//! names. A small built-in table covers the common NCEP parameters; callers
//! can add or override entries (for example from a collection config file)
//! without code changes.

use std::collections::HashMap;

use crate::record::ParamId;

/// Lookup key for GRIB2 parameters: (discipline, category, number)
pub type ParamKey = (u8, u8, u8);

/// Level description - either static text or a template with {value} placeholder
#[derive(Debug, Clone)]
pub enum LevelDescription {
    /// Static description (e.g., "surface", "mean sea level")
    Static(String),
    /// Template with {value} placeholder (e.g., "{value} mb", "{value} m above ground")
    Template(String),
}

impl LevelDescription {
    /// Format the level description, substituting placeholders if it's a template.
    ///
    /// Supported placeholders:
    /// - `{value}` - Raw level value (e.g., 100000 for 1000 mb in Pa)
    /// - `{value_mb}` - Value converted from Pa to mb (divided by 100)
    pub fn format(&self, value: f64) -> String {
        match self {
            LevelDescription::Static(s) => s.clone(),
            LevelDescription::Template(t) => {
                let result = t.replace("{value}", &trim_float(value));
                result.replace("{value_mb}", &trim_float(value / 100.0))
            }
        }
    }
}

fn trim_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// How GRIB1 octets 11-12 of the PDS are interpreted for a level type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelKind {
    /// No level value (surface, cloud base, entire atmosphere, ...).
    Surface,
    /// One 16-bit value.
    Single,
    /// Two 8-bit values (top, bottom).
    Layer,
}

/// GRIB1 table 3 level kind.
pub fn grib1_level_kind(level_type: u8) -> LevelKind {
    match level_type {
        20 | 100 | 103 | 105 | 107 | 109 | 111 | 113 | 115 | 117 | 119 | 125 | 160 => {
            LevelKind::Single
        }
        101 | 104 | 106 | 108 | 110 | 112 | 114 | 116 | 120 | 121 | 128 | 141 => LevelKind::Layer,
        _ => LevelKind::Surface,
    }
}

/// Whether records at this level type carry a meaningful vertical value and
/// so need a vertical axis.
pub fn is_vertical_coordinate(edition: u8, level_type: u8) -> bool {
    match edition {
        1 => grib1_level_kind(level_type) != LevelKind::Surface,
        _ => matches!(
            level_type,
            20 | 100 | 102 | 103 | 104 | 105 | 106 | 107 | 108 | 109 | 111 | 113 | 114 | 117 | 160
                | 161
        ),
    }
}

/// Short level name used in variable names.
pub fn level_name(edition: u8, level_type: u8) -> String {
    let name = match (edition, level_type) {
        (_, 1) => "surface",
        (_, 2) => "cloud_base",
        (_, 3) => "cloud_top",
        (_, 4) => "zeroDegC_isotherm",
        (_, 6) => "maximum_wind",
        (_, 7) => "tropopause",
        (_, 8) => "atmosphere_top",
        (_, 20) => "isothermal",
        (_, 100) => "isobaric",
        (1, 101) => "isobaric_layer",
        (1, 102) | (2, 101) => "msl",
        (1, 103) | (2, 102) => "altitude_above_msl",
        (1, 105) | (2, 103) => "height_above_ground",
        (1, 106) => "height_above_ground_layer",
        (1, 107) | (2, 104) => "sigma",
        (1, 108) => "sigma_layer",
        (1, 109) | (2, 105) => "hybrid",
        (1, 111) | (2, 106) => "depth_below_surface",
        (1, 112) => "depth_below_surface_layer",
        (1, 113) | (2, 107) => "isentrope",
        (1, 116) | (2, 108) => "pressure_difference_layer",
        (1, 117) | (2, 109) => "potential_vorticity_surface",
        (1, 200) | (2, 10) | (2, 200) => "entire_atmosphere",
        (1, 160) | (2, 160) => "depth_below_sea",
        _ => return format!("level{}", level_type),
    };
    name.to_string()
}

/// Suffix for a statistical process (GRIB2 code table 4.10).
pub fn statistic_suffix(process: u8) -> String {
    let name = match process {
        0 => "average",
        1 => "accumulation",
        2 => "maximum",
        3 => "minimum",
        4 => "difference",
        5 => "rms",
        6 => "stddev",
        7 => "covariance",
        8 => "difference_from_end",
        9 => "ratio",
        _ => return format!("stat{}", process),
    };
    name.to_string()
}

/// Suffix for a derived ensemble forecast (GRIB2 code table 4.7).
pub fn derived_suffix(derived: u8) -> String {
    let name = match derived {
        0 => "ens_mean",
        1 => "ens_weighted_mean",
        2 => "ens_stddev",
        3 => "ens_normalized_stddev",
        4 => "ens_spread",
        5 => "ens_anomaly_index",
        6 => "ens_cluster_mean",
        _ => return format!("derived{}", derived),
    };
    name.to_string()
}

const GRIB2_PARAMETERS: &[(ParamKey, &str)] = &[
    ((0, 0, 0), "TMP"),
    ((0, 0, 2), "POT"),
    ((0, 0, 4), "TMAX"),
    ((0, 0, 5), "TMIN"),
    ((0, 0, 6), "DPT"),
    ((0, 1, 0), "SPFH"),
    ((0, 1, 1), "RH"),
    ((0, 1, 7), "PRATE"),
    ((0, 1, 8), "APCP"),
    ((0, 1, 13), "WEASD"),
    ((0, 2, 2), "UGRD"),
    ((0, 2, 3), "VGRD"),
    ((0, 2, 8), "VVEL"),
    ((0, 2, 22), "GUST"),
    ((0, 3, 0), "PRES"),
    ((0, 3, 1), "PRMSL"),
    ((0, 3, 5), "HGT"),
    ((0, 6, 1), "TCDC"),
    ((0, 7, 6), "CAPE"),
    ((0, 16, 196), "REFC"),
    ((0, 19, 0), "VIS"),
    ((10, 2, 0), "ICEC"),
    ((209, 0, 16), "REFL"),
];

/// NCEP table 2 (shared with WMO for numbers below 128).
const GRIB1_PARAMETERS: &[(u8, &str)] = &[
    (1, "PRES"),
    (2, "PRMSL"),
    (7, "HGT"),
    (11, "TMP"),
    (15, "TMAX"),
    (16, "TMIN"),
    (17, "DPT"),
    (33, "UGRD"),
    (34, "VGRD"),
    (39, "VVEL"),
    (51, "SPFH"),
    (52, "RH"),
    (57, "EVP"),
    (59, "PRATE"),
    (61, "APCP"),
    (62, "NCPCP"),
    (63, "ACPCP"),
    (65, "WEASD"),
    (71, "TCDC"),
    (157, "CAPE"),
];

/// GRIB1/GRIB2 parameter and level lookup tables.
#[derive(Debug, Clone, Default)]
pub struct ParameterTables {
    /// (discipline, category, number) -> parameter short name (e.g., "TMP", "UGRD")
    parameters: HashMap<ParamKey, String>,
    /// GRIB1 (center, table version, number) -> short name; center 0 matches any.
    grib1_parameters: HashMap<(u16, u8, u8), String>,
    /// (edition, level_type) -> description pattern
    levels: HashMap<(u8, u8), LevelDescription>,
}

impl ParameterTables {
    /// Create empty tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables preloaded with the built-in parameter names.
    pub fn builtin() -> Self {
        let mut tables = Self::new();
        for &((d, c, n), name) in GRIB2_PARAMETERS {
            tables.add_parameter(d, c, n, name.to_string());
        }
        for &(number, name) in GRIB1_PARAMETERS {
            for table_version in 1..=3 {
                tables.add_grib1_parameter(0, table_version, number, name.to_string());
            }
        }
        tables
    }

    /// Add a GRIB2 parameter mapping
    pub fn add_parameter(&mut self, discipline: u8, category: u8, number: u8, name: String) {
        self.parameters.insert((discipline, category, number), name);
    }

    /// Add a GRIB1 parameter mapping. `center` 0 applies to every center.
    pub fn add_grib1_parameter(&mut self, center: u16, table_version: u8, number: u8, name: String) {
        self.grib1_parameters
            .insert((center, table_version, number), name);
    }

    /// Add a level description mapping
    pub fn add_level(&mut self, edition: u8, level_type: u8, description: LevelDescription) {
        self.levels.insert((edition, level_type), description);
    }

    /// Look up a parameter short name.
    ///
    /// Unknown GRIB2 parameters format as "P{discipline}_{category}_{number}",
    /// unknown GRIB1 parameters as "P{center}_{table}_{number}".
    pub fn parameter_name(&self, id: &ParamId) -> String {
        match *id {
            ParamId::Grib2 {
                discipline,
                category,
                number,
            } => self
                .parameters
                .get(&(discipline, category, number))
                .cloned()
                .unwrap_or_else(|| format!("P{}_{}_{}", discipline, category, number)),
            ParamId::Grib1 {
                center,
                table_version,
                number,
                ..
            } => self
                .grib1_parameters
                .get(&(center, table_version, number))
                .or_else(|| self.grib1_parameters.get(&(0, table_version, number)))
                .cloned()
                .unwrap_or_else(|| format!("P{}_{}_{}", center, table_version, number)),
        }
    }

    /// Look up level description by type code and value.
    ///
    /// Falls back to the short level name when no description is configured.
    pub fn level_description(&self, edition: u8, level_type: u8, value: f64) -> String {
        match self.levels.get(&(edition, level_type)) {
            Some(desc) => desc.format(value),
            None => level_name(edition, level_type),
        }
    }

    /// Get the number of parameters in the table
    pub fn parameter_count(&self) -> usize {
        self.parameters.len() + self.grib1_parameters.len()
    }

    /// Check if the tables are empty
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.grib1_parameters.is_empty() && self.levels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grib2(d: u8, c: u8, n: u8) -> ParamId {
        ParamId::Grib2 {
            discipline: d,
            category: c,
            number: n,
        }
    }

    fn grib1(center: u16, table_version: u8, number: u8) -> ParamId {
        ParamId::Grib1 {
            center,
            subcenter: 0,
            table_version,
            number,
        }
    }

    #[test]
    fn test_parameter_lookup() {
        let tables = ParameterTables::builtin();

        assert_eq!(tables.parameter_name(&grib2(0, 0, 0)), "TMP");
        assert_eq!(tables.parameter_name(&grib2(0, 2, 2)), "UGRD");
        assert_eq!(tables.parameter_name(&grib2(209, 0, 16)), "REFL");
        assert_eq!(tables.parameter_name(&grib1(7, 2, 61)), "APCP");
    }

    #[test]
    fn test_parameter_not_found() {
        let tables = ParameterTables::builtin();

        assert_eq!(tables.parameter_name(&grib2(99, 99, 99)), "P99_99_99");
        assert_eq!(tables.parameter_name(&grib1(98, 128, 167)), "P98_128_167");
    }

    #[test]
    fn test_center_specific_override() {
        let mut tables = ParameterTables::builtin();
        tables.add_grib1_parameter(98, 2, 61, "TP".to_string());

        assert_eq!(tables.parameter_name(&grib1(98, 2, 61)), "TP");
        assert_eq!(tables.parameter_name(&grib1(7, 2, 61)), "APCP");
    }

    #[test]
    fn test_level_template_description() {
        let mut tables = ParameterTables::new();
        tables.add_level(2, 100, LevelDescription::Template("{value_mb} mb".to_string()));
        tables.add_level(
            2,
            103,
            LevelDescription::Template("{value} m above ground".to_string()),
        );

        assert_eq!(tables.level_description(2, 100, 50000.0), "500 mb");
        assert_eq!(tables.level_description(2, 103, 2.0), "2 m above ground");
        assert_eq!(tables.level_description(2, 1, 0.0), "surface");
    }

    #[test]
    fn test_level_names_differ_by_edition() {
        assert_eq!(level_name(1, 105), "height_above_ground");
        assert_eq!(level_name(2, 103), "height_above_ground");
        assert_eq!(level_name(2, 105), "hybrid");
        assert_eq!(level_name(2, 250), "level250");
    }

    #[test]
    fn test_grib1_level_kind() {
        assert_eq!(grib1_level_kind(1), LevelKind::Surface);
        assert_eq!(grib1_level_kind(100), LevelKind::Single);
        assert_eq!(grib1_level_kind(101), LevelKind::Layer);
        assert!(is_vertical_coordinate(1, 100));
        assert!(!is_vertical_coordinate(2, 1));
        assert!(is_vertical_coordinate(2, 103));
    }

    #[test]
    fn test_empty_tables() {
        let tables = ParameterTables::new();

        assert_eq!(tables.parameter_count(), 0);
        assert!(tables.is_empty());
        assert_eq!(tables.parameter_name(&grib2(0, 0, 0)), "P0_0_0");
    }
}
