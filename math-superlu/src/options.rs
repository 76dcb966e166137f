//! Solver options and their translation from a key/value mapping
//!
//! The recognized keys, their accepted values and defaults live in the
//! immutable [`OPTION_TABLE`]. A mapping is translated in two passes: every
//! key is checked against the table first, so an unknown key is reported
//! before any value is interpreted.
//!
//! ```ignore
//! use math_audio_superlu::SluOptions;
//! use serde_json::json;
//!
//! let options = SluOptions::from_pairs(
//!     [("ColPerm", json!("MMD_AT_PLUS_A")), ("DiagPivotThresh", json!(0.01))],
//!     false,
//! )?;
//! ```

use crate::error::{Result, SluError};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

/// Whether (and how) the matrix is factored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Fact {
    #[serde(rename = "DOFACT")]
    DoFact,
    #[serde(rename = "SAMEPATTERN")]
    SamePattern,
    #[serde(rename = "SAMEPATTERN_SAMEROWPERM")]
    SamePatternSameRowPerm,
    #[serde(rename = "FACTORED")]
    Factored,
}

/// Fill-reducing column ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ColPerm {
    #[serde(rename = "NATURAL")]
    Natural,
    /// Minimum degree on the structure of AᵀA
    #[serde(rename = "MMD_ATA")]
    MmdAtA,
    /// Minimum degree on the structure of Aᵀ+A
    #[serde(rename = "MMD_AT_PLUS_A")]
    MmdAtPlusA,
    #[serde(rename = "COLAMD")]
    Colamd,
}

/// Which system is solved: A·x = b, Aᵀ·x = b or Aᴴ·x = b
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Trans {
    #[serde(rename = "NOTRANS", alias = "N")]
    NoTrans,
    #[serde(rename = "TRANS", alias = "T")]
    Trans,
    #[serde(rename = "CONJ", alias = "H")]
    Conj,
}

/// Iterative refinement applied after a direct solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum IterRefine {
    #[serde(rename = "NOREFINE", alias = "NONE")]
    NoRefine,
    #[serde(rename = "SINGLE", alias = "SLU_SINGLE")]
    Single,
    #[serde(rename = "DOUBLE", alias = "SLU_DOUBLE")]
    Double,
    #[serde(rename = "EXTRA", alias = "SLU_EXTRA")]
    Extra,
}

impl IterRefine {
    /// Whether residuals are accumulated in extended precision
    pub fn extended(self) -> bool {
        matches!(self, IterRefine::Double | IterRefine::Extra)
    }
}

/// Row pre-permutation applied before pivoting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RowPerm {
    #[serde(rename = "NOROWPERM")]
    NoRowPerm,
    #[serde(rename = "LARGEDIAG", alias = "LARGEDIAG_MC64")]
    LargeDiag,
}

/// Norm used by the incomplete factorization drop test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum IluNorm {
    #[serde(rename = "ONE_NORM")]
    OneNorm,
    #[serde(rename = "TWO_NORM")]
    TwoNorm,
    #[serde(rename = "INF_NORM")]
    InfNorm,
}

/// Modified ILU variant (diagonal compensation of dropped entries)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Milu {
    #[serde(rename = "SILU")]
    Silu,
    #[serde(rename = "SMILU_1")]
    Smilu1,
    #[serde(rename = "SMILU_2")]
    Smilu2,
    #[serde(rename = "SMILU_3")]
    Smilu3,
}

/// Bit set of incomplete-factorization drop rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DropRule(u32);

impl DropRule {
    pub const BASIC: DropRule = DropRule(0x0001);
    pub const PROWS: DropRule = DropRule(0x0002);
    pub const COLUMN: DropRule = DropRule(0x0004);
    pub const AREA: DropRule = DropRule(0x0008);
    pub const SECONDARY: DropRule = DropRule(0x000E);
    pub const DYNAMIC: DropRule = DropRule(0x0010);
    pub const INTERP: DropRule = DropRule(0x0100);

    const NAMED: [(&'static str, DropRule); 7] = [
        ("BASIC", DropRule::BASIC),
        ("PROWS", DropRule::PROWS),
        ("COLUMN", DropRule::COLUMN),
        ("AREA", DropRule::AREA),
        ("SECONDARY", DropRule::SECONDARY),
        ("DYNAMIC", DropRule::DYNAMIC),
        ("INTERP", DropRule::INTERP),
    ];

    const ALL_BITS: u32 = 0x011F;

    pub const fn empty() -> Self {
        DropRule(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        (bits & !Self::ALL_BITS == 0).then_some(DropRule(bits))
    }

    pub fn contains(self, other: DropRule) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any bit of `other` is set
    pub fn intersects(self, other: DropRule) -> bool {
        self.0 & other.0 != 0
    }

    fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_uppercase();
        let name = name.strip_prefix("DROP_").unwrap_or(&name);
        let name = if name == "PROW" { "PROWS" } else { name };
        Self::NAMED
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, rule)| *rule)
    }
}

impl std::ops::BitOr for DropRule {
    type Output = DropRule;

    fn bitor(self, rhs: DropRule) -> DropRule {
        DropRule(self.0 | rhs.0)
    }
}

impl fmt::Display for DropRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(name, rule)| *name != "SECONDARY" && self.contains(*rule))
            .map(|(name, _)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("NONE")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// One recognized option key
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    /// Canonical key
    pub name: &'static str,
    /// Alternative spellings accepted for the key
    pub aliases: &'static [&'static str],
    /// Accepted values and default
    pub description: &'static str,
}

/// Every option key the translator recognizes
pub static OPTION_TABLE: &[OptionSpec] = &[
    OptionSpec {
        name: "Fact",
        aliases: &[],
        description: "DOFACT | SamePattern | SamePattern_SameRowPerm | FACTORED (default DOFACT)",
    },
    OptionSpec {
        name: "Equil",
        aliases: &["Equilibrate"],
        description: "bool, scale rows and columns before factoring (default true)",
    },
    OptionSpec {
        name: "ColPerm",
        aliases: &["ColumnPermutation"],
        description: "NATURAL | MMD_ATA | MMD_AT_PLUS_A | COLAMD (default COLAMD)",
    },
    OptionSpec {
        name: "Trans",
        aliases: &[],
        description: "NOTRANS | TRANS | CONJ, system solved by a direct solve (default NOTRANS)",
    },
    OptionSpec {
        name: "IterRefine",
        aliases: &["IterativeRefinement"],
        description: "NOREFINE | SINGLE | DOUBLE | EXTRA (default NOREFINE)",
    },
    OptionSpec {
        name: "DiagPivotThresh",
        aliases: &["DiagonalPivotThreshold"],
        description: "float in [0, 1] (default 1.0, 0.1 for incomplete factorization)",
    },
    OptionSpec {
        name: "SymmetricMode",
        aliases: &[],
        description: "bool, order on the structure of Aᵀ+A (default false)",
    },
    OptionSpec {
        name: "PivotGrowth",
        aliases: &[],
        description: "bool, compute the reciprocal pivot growth (default false)",
    },
    OptionSpec {
        name: "ConditionNumber",
        aliases: &[],
        description: "bool, estimate the reciprocal condition number (default false)",
    },
    OptionSpec {
        name: "RowPerm",
        aliases: &["RowPermutation"],
        description: "NOROWPERM | LargeDiag (default NOROWPERM, LargeDiag for incomplete factorization)",
    },
    OptionSpec {
        name: "PrintStat",
        aliases: &[],
        description: "bool, log solver statistics after each call (default false)",
    },
    OptionSpec {
        name: "ReplaceTinyPivot",
        aliases: &[],
        description: "bool, replace pivots below sqrt(eps)·‖A‖ (default false)",
    },
    OptionSpec {
        name: "ILU_DropTol",
        aliases: &[],
        description: "float >= 0, relative drop tolerance (default 1e-4)",
    },
    OptionSpec {
        name: "ILU_FillTol",
        aliases: &[],
        description: "float >= 0, zero-pivot replacement scale (default 1e-2)",
    },
    OptionSpec {
        name: "ILU_FillFactor",
        aliases: &[],
        description: "float > 0, fill bound relative to nnz(A) (default 10.0)",
    },
    OptionSpec {
        name: "ILU_DropRule",
        aliases: &[],
        description: "list or bit mask of BASIC, PROWS, COLUMN, AREA, SECONDARY, DYNAMIC, INTERP (default BASIC|AREA)",
    },
    OptionSpec {
        name: "ILU_Norm",
        aliases: &[],
        description: "ONE_NORM | TWO_NORM | INF_NORM (default INF_NORM)",
    },
    OptionSpec {
        name: "ILU_MILU",
        aliases: &[],
        description: "SILU | SMILU_1 | SMILU_2 | SMILU_3 (default SILU)",
    },
    OptionSpec {
        name: "PanelSize",
        aliases: &[],
        description: "positive integer, columns per panel (default 20)",
    },
    OptionSpec {
        name: "Relax",
        aliases: &[],
        description: "positive integer, maximum supernode width (default 10)",
    },
];

/// Look up a key (canonical name or alias) in [`OPTION_TABLE`]
pub fn lookup_option(key: &str) -> Option<&'static OptionSpec> {
    OPTION_TABLE
        .iter()
        .find(|spec| spec.name == key || spec.aliases.contains(&key))
}

/// Populated option record consumed read-only by the solver
#[derive(Debug, Clone, PartialEq)]
pub struct SluOptions {
    pub fact: Fact,
    pub equil: bool,
    pub col_perm: ColPerm,
    pub trans: Trans,
    pub iter_refine: IterRefine,
    pub diag_pivot_thresh: f64,
    pub symmetric_mode: bool,
    pub pivot_growth: bool,
    pub condition_number: bool,
    pub row_perm: RowPerm,
    pub print_stat: bool,
    pub replace_tiny_pivot: bool,
    pub ilu_drop_tol: f64,
    pub ilu_fill_tol: f64,
    pub ilu_fill_factor: f64,
    pub ilu_drop_rule: DropRule,
    pub ilu_norm: IluNorm,
    pub ilu_milu: Milu,
    pub panel_size: usize,
    pub relax: usize,
}

impl Default for SluOptions {
    fn default() -> Self {
        Self {
            fact: Fact::DoFact,
            equil: true,
            col_perm: ColPerm::Colamd,
            trans: Trans::NoTrans,
            iter_refine: IterRefine::NoRefine,
            diag_pivot_thresh: 1.0,
            symmetric_mode: false,
            pivot_growth: false,
            condition_number: false,
            row_perm: RowPerm::NoRowPerm,
            print_stat: false,
            replace_tiny_pivot: false,
            ilu_drop_tol: 1e-4,
            ilu_fill_tol: 1e-2,
            ilu_fill_factor: 10.0,
            ilu_drop_rule: DropRule::BASIC | DropRule::AREA,
            ilu_norm: IluNorm::InfNorm,
            ilu_milu: Milu::Silu,
            panel_size: 20,
            relax: 10,
        }
    }
}

impl SluOptions {
    /// Defaults for an incomplete factorization
    pub fn ilu_default() -> Self {
        Self {
            diag_pivot_thresh: 0.1,
            row_perm: RowPerm::LargeDiag,
            ..Self::default()
        }
    }

    /// Defaults for a complete (`ilu == false`) or incomplete factorization
    pub fn defaults_for(ilu: bool) -> Self {
        if ilu {
            Self::ilu_default()
        } else {
            Self::default()
        }
    }

    /// Translate a configuration mapping.
    ///
    /// Missing keys take the defaults of [`SluOptions::defaults_for`]. An
    /// unrecognized key fails with [`SluError::ConfigError`] naming it.
    pub fn from_map(map: &Map<String, Value>, ilu: bool) -> Result<Self> {
        if let Some(unknown) = map.keys().find(|key| lookup_option(key).is_none()) {
            return Err(SluError::ConfigError(format!(
                "unrecognized option '{unknown}'"
            )));
        }

        let mut options = Self::defaults_for(ilu);
        for (key, value) in map {
            options.set(key, value.clone())?;
        }
        Ok(options)
    }

    /// Translate `(key, value)` pairs
    pub fn from_pairs<I, K, V>(pairs: I, ilu: bool) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let map: Map<String, Value> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_map(&map, ilu)
    }

    /// Translate a JSON object, e.g. the contents of an options file
    pub fn from_json_str(json: &str, ilu: bool) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| SluError::ConfigError(format!("malformed options JSON: {e}")))?;
        match value {
            Value::Object(map) => Self::from_map(&map, ilu),
            other => Err(SluError::ConfigError(format!(
                "options must be a JSON object, got {other}"
            ))),
        }
    }

    /// Set a single option by key
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let spec = lookup_option(key)
            .ok_or_else(|| SluError::ConfigError(format!("unrecognized option '{key}'")))?;
        let value = value.into();
        let name = spec.name;

        match name {
            "Fact" => self.fact = parse_enum(name, &value)?,
            "Equil" => self.equil = parse_bool(name, &value)?,
            "ColPerm" => self.col_perm = parse_enum(name, &value)?,
            "Trans" => self.trans = parse_enum(name, &value)?,
            "IterRefine" => self.iter_refine = parse_enum(name, &value)?,
            "DiagPivotThresh" => {
                self.diag_pivot_thresh = parse_float(name, &value, |x| (0.0..=1.0).contains(&x))?
            }
            "SymmetricMode" => self.symmetric_mode = parse_bool(name, &value)?,
            "PivotGrowth" => self.pivot_growth = parse_bool(name, &value)?,
            "ConditionNumber" => self.condition_number = parse_bool(name, &value)?,
            "RowPerm" => self.row_perm = parse_enum(name, &value)?,
            "PrintStat" => self.print_stat = parse_bool(name, &value)?,
            "ReplaceTinyPivot" => self.replace_tiny_pivot = parse_bool(name, &value)?,
            "ILU_DropTol" => self.ilu_drop_tol = parse_float(name, &value, |x| x >= 0.0)?,
            "ILU_FillTol" => self.ilu_fill_tol = parse_float(name, &value, |x| x >= 0.0)?,
            "ILU_FillFactor" => self.ilu_fill_factor = parse_float(name, &value, |x| x > 0.0)?,
            "ILU_DropRule" => self.ilu_drop_rule = parse_drop_rule(name, &value)?,
            "ILU_Norm" => self.ilu_norm = parse_enum(name, &value)?,
            "ILU_MILU" => self.ilu_milu = parse_enum(name, &value)?,
            "PanelSize" => self.panel_size = parse_positive(name, &value)?,
            "Relax" => self.relax = parse_positive(name, &value)?,
            _ => {
                return Err(SluError::ConfigError(format!(
                    "option '{name}' is listed but not handled"
                )));
            }
        }
        Ok(())
    }
}

fn invalid(name: &str, value: &Value, expected: &str) -> SluError {
    SluError::ConfigError(format!("option '{name}' expects {expected}, got {value}"))
}

/// Enum values are matched case-insensitively against their solver spelling
fn parse_enum<E: for<'de> Deserialize<'de>>(name: &str, value: &Value) -> Result<E> {
    let text = value
        .as_str()
        .ok_or_else(|| invalid(name, value, "a string"))?;
    serde_json::from_value(Value::String(text.trim().to_ascii_uppercase()))
        .map_err(|_| invalid(name, value, "one of the values listed in OPTION_TABLE"))
}

fn parse_bool(name: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid(name, value, "a boolean")),
        },
        Value::String(s) => match s.trim().to_ascii_uppercase().as_str() {
            "YES" | "TRUE" | "1" => Ok(true),
            "NO" | "FALSE" | "0" => Ok(false),
            _ => Err(invalid(name, value, "a boolean")),
        },
        _ => Err(invalid(name, value, "a boolean")),
    }
}

fn parse_float(name: &str, value: &Value, in_range: impl Fn(f64) -> bool) -> Result<f64> {
    let x = value
        .as_f64()
        .ok_or_else(|| invalid(name, value, "a number"))?;
    if x.is_finite() && in_range(x) {
        Ok(x)
    } else {
        Err(invalid(name, value, "a number in the documented range"))
    }
}

fn parse_positive(name: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .filter(|&n| n >= 1)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| invalid(name, value, "a positive integer"))
}

fn parse_drop_rule(name: &str, value: &Value) -> Result<DropRule> {
    let from_names = |names: Vec<&str>| -> Result<DropRule> {
        names.into_iter().try_fold(DropRule::empty(), |acc, part| {
            DropRule::from_name(part)
                .map(|rule| acc | rule)
                .ok_or_else(|| invalid(name, value, "known drop rule names"))
        })
    };

    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|bits| u32::try_from(bits).ok())
            .and_then(DropRule::from_bits)
            .ok_or_else(|| invalid(name, value, "a drop rule bit mask")),
        Value::String(s) => from_names(
            s.split([',', '|'])
                .filter(|part| !part.trim().is_empty())
                .collect(),
        ),
        Value::Array(items) => {
            let names: Option<Vec<&str>> = items.iter().map(Value::as_str).collect();
            from_names(names.ok_or_else(|| invalid(name, value, "a list of strings"))?)
        }
        _ => Err(invalid(name, value, "a drop rule")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = SluOptions::default();
        assert_eq!(options.col_perm, ColPerm::Colamd);
        assert_eq!(options.diag_pivot_thresh, 1.0);
        assert_eq!(options.panel_size, 20);
        assert_eq!(options.relax, 10);

        let ilu = SluOptions::ilu_default();
        assert_eq!(ilu.diag_pivot_thresh, 0.1);
        assert_eq!(ilu.row_perm, RowPerm::LargeDiag);
        assert_eq!(ilu.ilu_drop_rule, DropRule::BASIC | DropRule::AREA);
    }

    #[test]
    fn test_unknown_key_names_key() {
        let err = SluOptions::from_pairs([("NotARealOption", json!(1))], false).unwrap_err();
        match err {
            SluError::ConfigError(msg) => assert!(msg.contains("NotARealOption")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unknown_key_reported_before_bad_values() {
        let err = SluOptions::from_pairs(
            [("ColPerm", json!("NOT_AN_ORDERING")), ("Bogus", json!(true))],
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Bogus"));
    }

    #[test]
    fn test_enum_values_case_insensitive() {
        let options = SluOptions::from_pairs(
            [
                ("ColPerm", json!("mmd_at_plus_a")),
                ("IterRefine", json!("Double")),
                ("RowPerm", json!("LargeDiag")),
                ("Trans", json!("T")),
                ("ILU_MILU", json!("smilu_2")),
            ],
            false,
        )
        .unwrap();
        assert_eq!(options.col_perm, ColPerm::MmdAtPlusA);
        assert_eq!(options.iter_refine, IterRefine::Double);
        assert_eq!(options.row_perm, RowPerm::LargeDiag);
        assert_eq!(options.trans, Trans::Trans);
        assert_eq!(options.ilu_milu, Milu::Smilu2);
    }

    #[test]
    fn test_long_names_are_aliases() {
        let options = SluOptions::from_pairs(
            [
                ("ColumnPermutation", json!("NATURAL")),
                ("DiagonalPivotThreshold", json!(0.5)),
                ("Equilibrate", json!(false)),
                ("IterativeRefinement", json!("NONE")),
            ],
            false,
        )
        .unwrap();
        assert_eq!(options.col_perm, ColPerm::Natural);
        assert_eq!(options.diag_pivot_thresh, 0.5);
        assert!(!options.equil);
        assert_eq!(options.iter_refine, IterRefine::NoRefine);
    }

    #[test]
    fn test_bool_spellings() {
        let options = SluOptions::from_pairs(
            [
                ("Equil", json!("NO")),
                ("SymmetricMode", json!(1)),
                ("PrintStat", json!("yes")),
            ],
            false,
        )
        .unwrap();
        assert!(!options.equil);
        assert!(options.symmetric_mode);
        assert!(options.print_stat);

        assert!(SluOptions::from_pairs([("Equil", json!("maybe"))], false).is_err());
    }

    #[test]
    fn test_range_checks() {
        assert!(SluOptions::from_pairs([("DiagPivotThresh", json!(1.5))], false).is_err());
        assert!(SluOptions::from_pairs([("DiagPivotThresh", json!("0.5"))], false).is_err());
        assert!(SluOptions::from_pairs([("PanelSize", json!(0))], false).is_err());
        assert!(SluOptions::from_pairs([("Relax", json!(-3))], false).is_err());
        assert!(SluOptions::from_pairs([("ILU_FillFactor", json!(0.0))], false).is_err());
        assert!(SluOptions::from_pairs([("PanelSize", json!(8))], false).is_ok());
    }

    #[test]
    fn test_drop_rule_forms() {
        let options = SluOptions::from_pairs([("ILU_DropRule", json!("basic, column"))], true)
            .unwrap();
        assert_eq!(options.ilu_drop_rule, DropRule::BASIC | DropRule::COLUMN);

        let options =
            SluOptions::from_pairs([("ILU_DropRule", json!(["DROP_BASIC", "AREA"]))], true)
                .unwrap();
        assert_eq!(options.ilu_drop_rule, DropRule::BASIC | DropRule::AREA);

        let options = SluOptions::from_pairs([("ILU_DropRule", json!(0x0009))], true).unwrap();
        assert_eq!(options.ilu_drop_rule.to_string(), "BASIC|AREA");

        assert!(SluOptions::from_pairs([("ILU_DropRule", json!(0x0200))], true).is_err());
        assert!(SluOptions::from_pairs([("ILU_DropRule", json!("SOMETIMES"))], true).is_err());
    }

    #[test]
    fn test_from_json_str() {
        let options =
            SluOptions::from_json_str(r#"{"ColPerm": "NATURAL", "PanelSize": 4}"#, false)
                .unwrap();
        assert_eq!(options.col_perm, ColPerm::Natural);
        assert_eq!(options.panel_size, 4);

        assert!(SluOptions::from_json_str("[1, 2]", false).is_err());
        assert!(SluOptions::from_json_str("{not json", false).is_err());
    }

    #[test]
    fn test_table_names_are_unique() {
        for (i, a) in OPTION_TABLE.iter().enumerate() {
            for b in &OPTION_TABLE[i + 1..] {
                assert_ne!(a.name, b.name);
            }
            assert!(lookup_option(a.name).is_some());
        }
    }
}
