//! Row classifier
//!
//! Pure classification of one worksheet row from its primary cell (column C
//! of the sheet) and secondary cell (column F). First matching rule wins:
//!
//! 1. primary matches one of the fixed metric labels → metric row
//! 2. primary empty and secondary is `mos` (case-insensitive) → mos metric
//! 3. primary parses as a header label
//!    (`"<code> <filial> (<producto>/<envase-start>" [" - <envase-end>"]`)
//!    → header row
//!
//! Everything else is decorative and skipped without logging.

/// Canonical metric keys, one warehouse column each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    ArrivalsSailed,
    PlannedWbooking,
    ToBeBooked,
    Sales,
    Adjustments,
    FinalInv,
    Mos,
}

impl MetricKind {
    /// Warehouse column name for this metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::ArrivalsSailed => "arrivals_sailed",
            MetricKind::PlannedWbooking => "planned_wbooking",
            MetricKind::ToBeBooked => "to_be_booked",
            MetricKind::Sales => "sales",
            MetricKind::Adjustments => "adjustments",
            MetricKind::FinalInv => "final_inv",
            MetricKind::Mos => "mos",
        }
    }

    /// All metrics in warehouse column order.
    pub const ALL: [MetricKind; 7] = [
        MetricKind::ArrivalsSailed,
        MetricKind::PlannedWbooking,
        MetricKind::ToBeBooked,
        MetricKind::Sales,
        MetricKind::Adjustments,
        MetricKind::FinalInv,
        MetricKind::Mos,
    ];
}

/// Worksheet label → canonical metric key, exact literal matches.
const METRIC_LABELS: [(&str, MetricKind); 6] = [
    ("Arrivals + Sailed", MetricKind::ArrivalsSailed),
    ("Planned (w/booking)", MetricKind::PlannedWbooking),
    ("To be booked", MetricKind::ToBeBooked),
    ("Sales", MetricKind::Sales),
    ("Adjustments", MetricKind::Adjustments),
    ("Final Inv.", MetricKind::FinalInv),
];

/// Raw dimension context extracted from a header label, pre-resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    pub filial: String,
    pub producto: String,
    pub envase: String,
}

/// Classification outcome for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKind {
    Header(RawHeader),
    Metric(MetricKind),
    None,
}

/// Classify one row from its primary and secondary cells.
pub fn classify(primary: Option<&str>, secondary: Option<&str>) -> RowKind {
    let primary = primary.map(str::trim).filter(|s| !s.is_empty());

    let Some(text) = primary else {
        // Empty primary: only the mos marker in the secondary cell counts.
        let is_mos = secondary
            .map(|s| s.trim().to_lowercase() == "mos")
            .unwrap_or(false);
        return if is_mos {
            RowKind::Metric(MetricKind::Mos)
        } else {
            RowKind::None
        };
    };

    for (label, kind) in METRIC_LABELS {
        if text == label {
            return RowKind::Metric(kind);
        }
    }

    match parse_header(text) {
        Some(header) => RowKind::Header(header),
        None => RowKind::None,
    }
}

/// Parse a header label with the positional-token grammar. Any length
/// mismatch at any split step disqualifies the row.
fn parse_header(text: &str) -> Option<RawHeader> {
    // Split on " - ": the optional second segment continues the envase.
    let dash_parts: Vec<&str> = text.split(" - ").collect();
    if dash_parts.len() > 2 {
        return None;
    }

    // First segment must be exactly "<code> <filial> <producto/envase>".
    let space_parts: Vec<&str> = dash_parts[0].trim().split_whitespace().collect();
    if space_parts.len() != 3 {
        return None;
    }

    let slash_parts: Vec<&str> = space_parts[2].split('/').collect();
    if slash_parts.len() != 2 {
        return None;
    }

    let filial = space_parts[1].to_string();
    let producto = slash_parts[0].replace('(', "");

    let envase_start = slash_parts[1];
    let raw_envase = match dash_parts.get(1) {
        Some(end) if !end.is_empty() => format!("{envase_start} {end}"),
        _ => envase_start.to_string(),
    };
    let envase = raw_envase
        .replace(')', "")
        .trim_matches('-')
        .to_string();

    Some(RawHeader {
        filial,
        producto,
        envase,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_literals() {
        assert_eq!(
            classify(Some("Sales"), None),
            RowKind::Metric(MetricKind::Sales)
        );
        assert_eq!(
            classify(Some("  Arrivals + Sailed "), Some("whatever")),
            RowKind::Metric(MetricKind::ArrivalsSailed)
        );
        assert_eq!(
            classify(Some("Final Inv."), None),
            RowKind::Metric(MetricKind::FinalInv)
        );
        // Near-miss labels are not metrics and do not parse as headers.
        assert_eq!(classify(Some("Sales Total"), None), RowKind::None);
    }

    #[test]
    fn test_mos_marker() {
        assert_eq!(classify(None, Some("MOS")), RowKind::Metric(MetricKind::Mos));
        assert_eq!(classify(None, Some(" mos ")), RowKind::Metric(MetricKind::Mos));
        assert_eq!(classify(None, Some("x")), RowKind::None);
        assert_eq!(classify(None, None), RowKind::None);
        assert_eq!(classify(Some("   "), Some("mos")), RowKind::Metric(MetricKind::Mos));
    }

    #[test]
    fn test_header_without_second_segment() {
        let kind = classify(Some("1.1.1.1 Wil (CRY/CL"), None);
        assert_eq!(
            kind,
            RowKind::Header(RawHeader {
                filial: "Wil".to_string(),
                producto: "CRY".to_string(),
                envase: "CL".to_string(),
            })
        );
    }

    #[test]
    fn test_header_with_second_segment() {
        let kind = classify(Some("1.1.1.1 Wil (CRY/CL - 50L)"), None);
        assert_eq!(
            kind,
            RowKind::Header(RawHeader {
                filial: "Wil".to_string(),
                producto: "CRY".to_string(),
                envase: "CL 50L".to_string(),
            })
        );
    }

    #[test]
    fn test_header_grammar_mismatches() {
        assert_eq!(classify(Some("not a valid header"), None), RowKind::None);
        // Four space-tokens in the first segment.
        assert_eq!(classify(Some("1.1 Wil Extra (CRY/CL"), None), RowKind::None);
        // No slash in the third token.
        assert_eq!(classify(Some("1.1 Wil (CRYCL"), None), RowKind::None);
        // Too many slash parts.
        assert_eq!(classify(Some("1.1 Wil (CRY/CL/X"), None), RowKind::None);
        // Three " - " segments.
        assert_eq!(
            classify(Some("1.1 Wil (CRY/CL - 50L - extra"), None),
            RowKind::None
        );
    }
}
