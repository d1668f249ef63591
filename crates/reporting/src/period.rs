use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use coop_core::DomainError;

/// Named reporting window ending at an as-of date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportPeriod {
    Weekly,
    Monthly,
    Quarterly,
    SemiAnnual,
    Annual,
}

impl ReportPeriod {
    /// `(start, end)` with `end = as_of`.
    pub fn resolve(self, as_of: NaiveDate) -> (NaiveDate, NaiveDate) {
        let start = match self {
            ReportPeriod::Weekly => as_of.checked_sub_days(Days::new(7)),
            ReportPeriod::Monthly => as_of.checked_sub_months(Months::new(1)),
            ReportPeriod::Quarterly => as_of.checked_sub_months(Months::new(3)),
            ReportPeriod::SemiAnnual => as_of.checked_sub_months(Months::new(6)),
            ReportPeriod::Annual => as_of.checked_sub_months(Months::new(12)),
        };
        (start.unwrap_or(NaiveDate::MIN), as_of)
    }
}

impl core::str::FromStr for ReportPeriod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WEEKLY" => Ok(Self::Weekly),
            "MONTHLY" => Ok(Self::Monthly),
            "QUARTERLY" => Ok(Self::Quarterly),
            "SEMI_ANNUAL" => Ok(Self::SemiAnnual),
            "ANNUAL" => Ok(Self::Annual),
            other => Err(DomainError::invalid_argument(format!(
                "unknown report period '{other}'"
            ))),
        }
    }
}

/// `"<start> to <end>"` unless the caller supplied a label.
pub fn range_label(label: Option<&str>, start: NaiveDate, end: NaiveDate) -> String {
    label.map_or_else(|| format!("{start} to {end}"), str::to_string)
}

/// `"As of <date>"` unless the caller supplied a label.
pub fn as_of_label(label: Option<&str>, as_of: NaiveDate) -> String {
    label.map_or_else(|| format!("As of {as_of}"), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn resolves_each_window() {
        let as_of = date(2025, 5, 31);
        assert_eq!(ReportPeriod::Weekly.resolve(as_of), (date(2025, 5, 24), as_of));
        assert_eq!(ReportPeriod::Monthly.resolve(as_of), (date(2025, 4, 30), as_of));
        assert_eq!(ReportPeriod::Quarterly.resolve(as_of), (date(2025, 2, 28), as_of));
        assert_eq!(ReportPeriod::SemiAnnual.resolve(as_of), (date(2024, 11, 30), as_of));
        assert_eq!(ReportPeriod::Annual.resolve(as_of), (date(2024, 5, 31), as_of));
    }

    #[test]
    fn parses_names() {
        assert_eq!(ReportPeriod::from_str("semi_annual").unwrap(), ReportPeriod::SemiAnnual);
        assert!(ReportPeriod::from_str("fortnightly").is_err());
    }

    #[test]
    fn labels_default_unless_given() {
        let d = date(2025, 1, 1);
        assert_eq!(range_label(None, d, date(2025, 1, 31)), "2025-01-01 to 2025-01-31");
        assert_eq!(as_of_label(None, d), "As of 2025-01-01");
        assert_eq!(as_of_label(Some("FY close"), d), "FY close");
    }
}
