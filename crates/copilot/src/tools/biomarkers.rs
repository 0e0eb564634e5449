use copilot_core::tool::{Error as ToolError, Tool, ToolContext, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A reference range for one biomarker, for adults.
struct Range {
    name: &'static str,
    aliases: &'static [&'static str],
    unit: &'static str,
    low: Option<f64>,
    high: Option<f64>,
}

const RANGES: &[Range] = &[
    Range {
        name: "ldl",
        aliases: &["ldl_cholesterol", "ldl_c"],
        unit: "mg/dL",
        low: None,
        high: Some(100.0),
    },
    Range {
        name: "hdl",
        aliases: &["hdl_cholesterol", "hdl_c"],
        unit: "mg/dL",
        low: Some(40.0),
        high: None,
    },
    Range {
        name: "total_cholesterol",
        aliases: &["cholesterol"],
        unit: "mg/dL",
        low: None,
        high: Some(200.0),
    },
    Range {
        name: "triglycerides",
        aliases: &["tg"],
        unit: "mg/dL",
        low: None,
        high: Some(150.0),
    },
    Range {
        name: "fasting_glucose",
        aliases: &["glucose"],
        unit: "mg/dL",
        low: Some(70.0),
        high: Some(99.0),
    },
    Range {
        name: "hba1c",
        aliases: &["a1c", "hemoglobin_a1c"],
        unit: "%",
        low: Some(4.0),
        high: Some(5.6),
    },
    Range {
        name: "tsh",
        aliases: &[],
        unit: "mIU/L",
        low: Some(0.4),
        high: Some(4.0),
    },
    Range {
        name: "vitamin_d",
        aliases: &["25_oh_d", "vitamin_d_25_oh"],
        unit: "ng/mL",
        low: Some(30.0),
        high: Some(100.0),
    },
    Range {
        name: "hemoglobin",
        aliases: &["hgb", "hb"],
        unit: "g/dL",
        low: Some(12.0),
        high: Some(17.5),
    },
    Range {
        name: "creatinine",
        aliases: &[],
        unit: "mg/dL",
        low: Some(0.6),
        high: Some(1.3),
    },
    Range {
        name: "alt",
        aliases: &["sgpt"],
        unit: "U/L",
        low: Some(7.0),
        high: Some(56.0),
    },
    Range {
        name: "crp",
        aliases: &["c_reactive_protein", "hs_crp"],
        unit: "mg/L",
        low: None,
        high: Some(3.0),
    },
    Range {
        name: "ferritin",
        aliases: &[],
        unit: "ng/mL",
        low: Some(24.0),
        high: Some(336.0),
    },
    Range {
        name: "sodium",
        aliases: &["na"],
        unit: "mmol/L",
        low: Some(135.0),
        high: Some(145.0),
    },
    Range {
        name: "potassium",
        aliases: &["k"],
        unit: "mmol/L",
        low: Some(3.5),
        high: Some(5.0),
    },
];

/// Converts a value reported in another unit into the unit of the range.
struct Conversion {
    marker: &'static str,
    unit: &'static str,
    convert: fn(f64) -> f64,
}

const CONVERSIONS: &[Conversion] = &[
    Conversion {
        marker: "ldl",
        unit: "mmol/L",
        convert: |v| v * 38.67,
    },
    Conversion {
        marker: "hdl",
        unit: "mmol/L",
        convert: |v| v * 38.67,
    },
    Conversion {
        marker: "total_cholesterol",
        unit: "mmol/L",
        convert: |v| v * 38.67,
    },
    Conversion {
        marker: "triglycerides",
        unit: "mmol/L",
        convert: |v| v * 88.57,
    },
    Conversion {
        marker: "fasting_glucose",
        unit: "mmol/L",
        convert: |v| v * 18.0,
    },
    // IFCC to NGSP.
    Conversion {
        marker: "hba1c",
        unit: "mmol/mol",
        convert: |v| v * 0.09148 + 2.152,
    },
    Conversion {
        marker: "tsh",
        unit: "uIU/mL",
        convert: |v| v,
    },
    Conversion {
        marker: "vitamin_d",
        unit: "nmol/L",
        convert: |v| v / 2.496,
    },
    Conversion {
        marker: "hemoglobin",
        unit: "g/L",
        convert: |v| v / 10.0,
    },
    Conversion {
        marker: "creatinine",
        unit: "umol/L",
        convert: |v| v / 88.4,
    },
    Conversion {
        marker: "crp",
        unit: "mg/dL",
        convert: |v| v * 10.0,
    },
    Conversion {
        marker: "ferritin",
        unit: "ug/L",
        convert: |v| v,
    },
    Conversion {
        marker: "sodium",
        unit: "mEq/L",
        convert: |v| v,
    },
    Conversion {
        marker: "potassium",
        unit: "mEq/L",
        convert: |v| v,
    },
];

fn normalize_unit(unit: &str) -> String {
    unit.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            // Micro sign and Greek mu.
            '\u{b5}' | '\u{3bc}' => 'u',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Returns `value` in the unit of `range`, or `None` if `unit` can't be
/// converted.
fn to_range_unit(range: &Range, value: f64, unit: &str) -> Option<f64> {
    let unit = normalize_unit(unit);
    if unit == normalize_unit(range.unit) {
        return Some(value);
    }
    CONVERSIONS
        .iter()
        .find(|c| c.marker == range.name && normalize_unit(c.unit) == unit)
        .map(|c| (c.convert)(value))
}

fn normalize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' | '(' | ')' | ',' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn find_range(name: &str) -> Option<&'static Range> {
    let name = normalize(name);
    RANGES
        .iter()
        .find(|r| r.name == name || r.aliases.contains(&name.as_str()))
}

/// One lab result.
#[derive(Deserialize, JsonSchema)]
pub struct Biomarker {
    #[schemars(description = "Name of the biomarker, e.g. \"LDL\" or \"HbA1c\".")]
    name: String,
    #[schemars(description = "The measured value.")]
    value: f64,
    #[schemars(
        description = "Unit of the value as printed on the report. Common SI \
                       units are converted, values without a unit are assumed \
                       to be in conventional US units."
    )]
    #[serde(default)]
    unit: Option<String>,
}

/// Input of [`CompareBiomarkersTool`].
#[derive(Deserialize, JsonSchema)]
pub struct CompareBiomarkersParameters {
    #[schemars(description = "Lab results to compare with reference ranges.")]
    biomarkers: Vec<Biomarker>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Low,
    High,
}

#[derive(Debug, PartialEq, Serialize)]
struct OutOfRange {
    name: &'static str,
    value: f64,
    unit: &'static str,
    /// The value as reported, if it was converted.
    #[serde(skip_serializing_if = "Option::is_none")]
    reported: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    high: Option<f64>,
    status: Status,
}

/// A known biomarker reported in a unit that can't be compared.
#[derive(Debug, PartialEq, Serialize)]
struct UnitMismatch {
    name: &'static str,
    value: f64,
    unit: String,
    expected_unit: &'static str,
}

#[derive(Debug, Default, PartialEq, Serialize)]
struct Comparison {
    out_of_range: Vec<OutOfRange>,
    in_range: Vec<&'static str>,
    unit_mismatch: Vec<UnitMismatch>,
    unknown: Vec<String>,
}

fn compare(biomarkers: &[Biomarker]) -> Comparison {
    let mut comparison = Comparison::default();
    for biomarker in biomarkers {
        let Some(range) = find_range(&biomarker.name) else {
            comparison.unknown.push(biomarker.name.clone());
            continue;
        };
        let (value, reported) = match &biomarker.unit {
            None => (biomarker.value, None),
            Some(unit) => {
                let Some(value) = to_range_unit(range, biomarker.value, unit)
                else {
                    debug!("can't compare {} in {unit}", range.name);
                    comparison.unit_mismatch.push(UnitMismatch {
                        name: range.name,
                        value: biomarker.value,
                        unit: unit.clone(),
                        expected_unit: range.unit,
                    });
                    continue;
                };
                let converted =
                    normalize_unit(unit) != normalize_unit(range.unit);
                let reported =
                    converted.then(|| format!("{} {unit}", biomarker.value));
                (value, reported)
            }
        };
        let status = if range.low.is_some_and(|low| value < low) {
            Some(Status::Low)
        } else if range.high.is_some_and(|high| value > high) {
            Some(Status::High)
        } else {
            None
        };
        match status {
            Some(status) => comparison.out_of_range.push(OutOfRange {
                name: range.name,
                value: (value * 100.0).round() / 100.0,
                unit: range.unit,
                reported,
                low: range.low,
                high: range.high,
                status,
            }),
            None => comparison.in_range.push(range.name),
        }
    }
    comparison
}

/// A tool that compares lab results with common reference ranges.
pub struct CompareBiomarkersTool {
    parameter_schema: Value,
}

impl CompareBiomarkersTool {
    /// Creates a new biomarker comparison tool.
    #[inline]
    pub fn new() -> Self {
        Self {
            parameter_schema: schema_for!(CompareBiomarkersParameters)
                .to_value(),
        }
    }
}

impl Default for CompareBiomarkersTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CompareBiomarkersTool {
    type Input = CompareBiomarkersParameters;

    fn name(&self) -> &str {
        "compare_biomarkers"
    }

    fn description(&self) -> &str {
        r#"
Compare lab results with adult reference ranges.
Returns the biomarkers that are out of range with their range and whether they are low or high, the ones in range, the ones reported in a unit that can't be compared, and the names that are not recognized."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: CompareBiomarkersParameters,
        _ctx: &ToolContext,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        async move {
            if input.biomarkers.is_empty() {
                return Err(ToolError::invalid_input()
                    .with_reason("no biomarkers given"));
            }
            serde_json::to_value(compare(&input.biomarkers)).map_err(|err| {
                ToolError::execution_error().with_reason(err.to_string())
            })
        }
    }
}
