use crate::{Rule, RuleError};

/// Parses a rule override header: comma-separated
/// `feature:duration:threshold[:probability]` tuples.
///
/// Header values come from callers outside our trust boundary, so any
/// malformed tuple rejects the whole header with no field-level defaulting.
/// Duration must be a positive integer; probability, when given, must lie
/// in `[0, 100]`.
pub fn parse_override(header: &str) -> Result<Vec<Rule>, RuleError> {
    header
        .split(',')
        .map(|tuple| parse_tuple(tuple.trim()))
        .collect()
}

fn parse_tuple(tuple: &str) -> Result<Rule, RuleError> {
    let malformed = || RuleError::MalformedOverride(tuple.to_string());

    let parts: Vec<&str> = tuple.split(':').collect();
    if parts.len() < 3 || parts.len() > 4 {
        return Err(malformed());
    }

    let feature = parts[0].parse()?;
    let duration: u64 = parts[1].parse().map_err(|_| malformed())?;
    if duration == 0 {
        return Err(malformed());
    }
    let threshold: f64 = parts[2].parse().map_err(|_| malformed())?;
    if !threshold.is_finite() {
        return Err(malformed());
    }

    let probability = match parts.get(3) {
        Some(raw) => {
            let p: f64 = raw.parse().map_err(|_| malformed())?;
            if !(0.0..=100.0).contains(&p) {
                return Err(malformed());
            }
            p
        }
        None => 100.0,
    };

    Ok(Rule {
        feature,
        duration,
        threshold,
        probability,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Feature;

    #[test]
    fn parses_three_and_four_field_tuples() {
        let rules = parse_override("fail_count:30:1:100, avg_exec_time:60:500").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].feature, Feature::FailCount);
        assert_eq!(rules[0].duration, 30);
        assert_eq!(rules[0].threshold, 1.0);
        assert_eq!(rules[0].probability, 100.0);
        assert_eq!(rules[1].feature, Feature::AvgExecTime);
        assert_eq!(rules[1].probability, 100.0);
    }

    #[test]
    fn one_bad_tuple_rejects_the_header() {
        assert!(parse_override("fail_count:30:1,bogus_feature:10:5").is_err());
        assert!(parse_override("fail_count:30:1,avg_exec_time:60").is_err());
    }

    #[test]
    fn rejects_zero_duration_and_bad_probability() {
        assert!(parse_override("fail_count:0:1").is_err());
        assert!(parse_override("fail_count:30:1:101").is_err());
        assert!(parse_override("fail_count:30:1:-5").is_err());
        assert!(parse_override("fail_count:30:NaN").is_err());
    }

    #[test]
    fn rejects_extra_fields() {
        assert!(parse_override("fail_count:30:1:100:9").is_err());
    }
}
