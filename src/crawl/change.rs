//! Freshness rule and change detection.
//!
//! Freshness decides *when* a resource is probed again; change detection
//! decides *whether* a probe outcome differs from its predecessor along the
//! header-level signals. The checksum signal needs a download and lives in
//! the analysis pipeline.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Check, ModifiedSource};
use crate::repository::DueCandidate;

/// Whether a candidate is due for a check.
///
/// Priority always wins, then resources never checked. Otherwise the
/// elapsed time since the last check must exceed the apparent remote change
/// interval when one is known, or the default delay when not.
pub fn is_due(candidate: &DueCandidate, default_delay_days: i64, now: DateTime<Utc>) -> bool {
    if candidate.resource.priority {
        return true;
    }
    let Some(last_check_at) = candidate.last_check_at else {
        return true;
    };
    let since_check = now - last_check_at;
    match candidate.last_detected_modified_at {
        Some(modified_at) => since_check > (now - modified_at),
        None => since_check > Duration::days(default_delay_days),
    }
}

/// A detected modification: when, and which signal dated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub at: DateTime<Utc>,
    pub source: ModifiedSource,
}

/// Outcome of comparing a fresh check against its predecessor.
#[derive(Debug, Clone, Default)]
pub struct ChangeAnalysis {
    /// No predecessor exists for this `(url, resource_id)`.
    pub is_first: bool,
    /// Signals that differ from the previous check.
    pub changed_signals: Vec<&'static str>,
    /// First matching detection rule, if any.
    pub detection: Option<Detection>,
    /// Both checks exposed a Last-Modified naming the same instant.
    pub last_modified_matches: bool,
    /// Both checks exposed an equal Content-Length.
    pub content_length_matches: bool,
}

impl ChangeAnalysis {
    /// A notification fires on the first check or on any changed signal.
    pub fn should_notify(&self) -> bool {
        self.is_first || !self.changed_signals.is_empty()
    }

    /// The origin's own metadata proves the content did not change, so a
    /// download would be wasted. Absent that proof the checksum has to
    /// decide.
    pub fn proven_unchanged(&self) -> bool {
        self.changed_signals.is_empty()
            && self.detection.is_none()
            && (self.last_modified_matches || self.content_length_matches)
    }
}

/// Compare a freshly-recorded check to its immediate predecessor along the
/// header-level signals, in rule order: last-modified header, content-length
/// header, harvest metadata. A content-type change is announced but never
/// dates a modification.
pub fn analyze_change(
    current: &Check,
    previous: Option<&Check>,
    harvest_modified_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ChangeAnalysis {
    let mut analysis = ChangeAnalysis {
        is_first: previous.is_none(),
        ..Default::default()
    };

    let current_last_modified = current.headers.last_modified();
    // The origin may have stopped sending the header since; the timestamp we
    // recorded for the previous check still anchors the comparison.
    let previous_last_modified = previous.and_then(|p| {
        p.headers
            .last_modified()
            .or(p.detected_last_modified_at)
    });
    let current_length = current.headers.content_length();
    let previous_length = previous.and_then(|p| p.headers.content_length());

    analysis.last_modified_matches = matches!(
        (current_last_modified, previous_last_modified),
        (Some(a), Some(b)) if a == b
    );
    analysis.content_length_matches = matches!(
        (current_length, previous_length),
        (Some(a), Some(b)) if a == b
    );

    if let Some(prev) = previous {
        if current.status != prev.status {
            analysis.changed_signals.push("status");
        }
        if current.headers.content_type() != prev.headers.content_type() {
            analysis.changed_signals.push("content-type");
        }
        if previous_length.is_some() && current_length != previous_length {
            analysis.changed_signals.push("content-length");
        }
    }

    // Rule 1: the origin dates its own content.
    if let Some(modified_at) = current_last_modified {
        let differs = previous_last_modified
            .map(|prev| prev != modified_at)
            .unwrap_or(true);
        if differs {
            analysis.detection = Some(Detection {
                at: modified_at,
                source: ModifiedSource::LastModifiedHeader,
            });
            if previous.is_some() {
                analysis.changed_signals.push("last-modified");
            }
        }
        return analysis;
    }

    // Rule 2: a size change dates the content to now.
    if let (Some(current_length), Some(previous_length)) = (current_length, previous_length) {
        if current_length != previous_length {
            analysis.detection = Some(Detection {
                at: now,
                source: ModifiedSource::ContentLengthHeader,
            });
            return analysis;
        }
    }

    // Rule 3: the harvester reported a modification we have not recorded yet.
    if let Some(harvested) = harvest_modified_at {
        let previous_detected = previous.and_then(|p| p.detected_last_modified_at);
        if previous_detected != Some(harvested) {
            analysis.detection = Some(Detection {
                at: harvested,
                source: ModifiedSource::HarvestResourceMetadata,
            });
            analysis.changed_signals.push("harvest-metadata");
        }
    }

    analysis
}

/// Rule 4, applied after download: a checksum difference dates the content
/// to now.
pub fn checksum_detection(
    current_checksum: &str,
    previous: Option<&Check>,
    now: DateTime<Utc>,
) -> Option<Detection> {
    let previous_checksum = previous.and_then(|p| p.checksum.as_deref())?;
    if previous_checksum != current_checksum {
        Some(Detection {
            at: now,
            source: ModifiedSource::ComputedChecksum,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckHeaders, Resource};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn candidate(
        priority: bool,
        last_check_days_ago: Option<f64>,
        modified_days_ago: Option<f64>,
    ) -> DueCandidate {
        let now = Utc::now();
        let days = |d: f64| now - Duration::seconds((d * 86_400.0) as i64);
        DueCandidate {
            resource: Resource {
                id: 1,
                dataset_id: "d".to_string(),
                resource_id: Uuid::new_v4(),
                url: "https://example.com/a.csv".to_string(),
                harvest_modified_at: None,
                priority,
                deleted: false,
                status: None,
                last_check_at: None,
            },
            last_check_at: last_check_days_ago.map(days),
            last_detected_modified_at: modified_days_ago.map(days),
        }
    }

    fn check_with_headers(pairs: &[(&str, &str)]) -> Check {
        let mut headers = BTreeMap::new();
        for (k, v) in pairs {
            headers.insert(k.to_string(), v.to_string());
        }
        Check {
            id: 0,
            resource_id: Uuid::nil(),
            url: "https://example.com/a.csv".to_string(),
            created_at: Utc::now(),
            status: Some(200),
            headers: CheckHeaders(headers),
            timeout: false,
            error: None,
            response_time_ms: None,
            checksum: None,
            filesize: None,
            mime_type: None,
            parsing_table: None,
            parsing_error: None,
            parsing_started_at: None,
            parsing_finished_at: None,
            detected_last_modified_at: None,
            detected_last_modified_source: None,
            deleted: false,
        }
    }

    #[test]
    fn freshness_uses_default_delay_without_detection() {
        assert!(!is_due(&candidate(false, Some(6.0), None), 7, Utc::now()));
        assert!(is_due(&candidate(false, Some(8.0), None), 7, Utc::now()));
    }

    #[test]
    fn freshness_tracks_remote_change_interval() {
        // checked 1 day ago, modified 2 days ago: not due yet
        assert!(!is_due(&candidate(false, Some(1.0), Some(2.0)), 7, Utc::now()));
        // checked 2 days ago, modified 1 day ago: due
        assert!(is_due(&candidate(false, Some(2.0), Some(1.0)), 7, Utc::now()));
        // equal intervals stay not due
        assert!(!is_due(&candidate(false, Some(1.0), Some(1.0)), 7, Utc::now()));
    }

    #[test]
    fn priority_and_never_checked_are_always_due() {
        assert!(is_due(&candidate(true, Some(0.1), Some(5.0)), 7, Utc::now()));
        assert!(is_due(&candidate(false, None, None), 7, Utc::now()));
    }

    #[test]
    fn identical_last_modified_is_silent() {
        let date = "Thu, 09 Jan 2020 09:33:37 GMT";
        let prev = check_with_headers(&[("last-modified", date)]);
        let current = check_with_headers(&[("last-modified", date)]);
        let analysis = analyze_change(&current, Some(&prev), None, Utc::now());
        assert!(!analysis.should_notify());
        assert!(analysis.detection.is_none());
    }

    #[test]
    fn changed_last_modified_detects_from_header() {
        let prev = check_with_headers(&[("last-modified", "Thu, 09 Jan 2020 09:33:37 GMT")]);
        let current = check_with_headers(&[("last-modified", "Fri, 10 Jan 2020 09:33:37 GMT")]);
        let analysis = analyze_change(&current, Some(&prev), None, Utc::now());
        assert!(analysis.should_notify());
        let detection = analysis.detection.unwrap();
        assert_eq!(detection.source, ModifiedSource::LastModifiedHeader);
        assert_eq!(detection.at.to_rfc3339(), "2020-01-10T09:33:37+00:00");
    }

    #[test]
    fn same_instant_different_timezone_is_not_a_change() {
        let prev = check_with_headers(&[("last-modified", "Thu, 09 Jan 2020 10:33:37 +0100")]);
        let current = check_with_headers(&[("last-modified", "Thu, 09 Jan 2020 09:33:37 GMT")]);
        let analysis = analyze_change(&current, Some(&prev), None, Utc::now());
        assert!(!analysis.should_notify());
    }

    #[test]
    fn content_length_change_detects_to_now() {
        let now = Utc::now();
        let prev = check_with_headers(&[("content-length", "10")]);
        let current = check_with_headers(&[("content-length", "15")]);
        let analysis = analyze_change(&current, Some(&prev), None, now);
        assert!(analysis.should_notify());
        assert_eq!(analysis.changed_signals, vec!["content-length"]);
        let detection = analysis.detection.unwrap();
        assert_eq!(detection.source, ModifiedSource::ContentLengthHeader);
        assert_eq!(detection.at, now);
    }

    #[test]
    fn content_type_change_notifies_without_detection() {
        let prev = check_with_headers(&[("content-type", "application/json"), ("content-length", "10")]);
        let current = check_with_headers(&[("content-type", "text/csv"), ("content-length", "10")]);
        let analysis = analyze_change(&current, Some(&prev), None, Utc::now());
        assert!(analysis.should_notify());
        assert_eq!(analysis.changed_signals, vec!["content-type"]);
        assert!(analysis.detection.is_none());
    }

    #[test]
    fn recorded_detection_anchors_when_previous_header_missing() {
        use crate::models::parse_http_date;

        let mut prev = check_with_headers(&[("content-type", "application/json")]);
        prev.detected_last_modified_at = parse_http_date("Thu, 09 Jan 2020 09:33:37 GMT+1");
        let current = check_with_headers(&[
            ("content-type", "application/json"),
            ("last-modified", "Thu, 09 Jan 2020 09:33:37 GMT+4"),
        ]);

        let analysis = analyze_change(&current, Some(&prev), None, Utc::now());
        assert!(analysis.should_notify());
        let detection = analysis.detection.unwrap();
        assert_eq!(detection.source, ModifiedSource::LastModifiedHeader);
        assert_eq!(
            Some(detection.at),
            parse_http_date("Thu, 09 Jan 2020 09:33:37 GMT+4")
        );
    }

    #[test]
    fn harvest_metadata_detects_when_unrecorded() {
        let harvested = "2022-12-06T05:00:32.647+00:00"
            .parse::<DateTime<Utc>>()
            .unwrap();
        let mut prev = check_with_headers(&[]);
        prev.detected_last_modified_at = Some(harvested - Duration::days(10));
        let current = check_with_headers(&[]);

        let analysis = analyze_change(&current, Some(&prev), Some(harvested), Utc::now());
        let detection = analysis.detection.unwrap();
        assert_eq!(detection.source, ModifiedSource::HarvestResourceMetadata);
        assert_eq!(detection.at, harvested);
        assert!(analysis.should_notify());

        // already recorded: silent
        prev.detected_last_modified_at = Some(harvested);
        let analysis = analyze_change(&current, Some(&prev), Some(harvested), Utc::now());
        assert!(analysis.detection.is_none());
        assert!(!analysis.should_notify());
    }

    #[test]
    fn first_check_notifies_and_dates_from_header() {
        let current = check_with_headers(&[("last-modified", "Thu, 09 Jan 2020 09:33:37 GMT")]);
        let analysis = analyze_change(&current, None, None, Utc::now());
        assert!(analysis.is_first);
        assert!(analysis.should_notify());
        assert_eq!(
            analysis.detection.unwrap().source,
            ModifiedSource::LastModifiedHeader
        );
    }

    #[test]
    fn checksum_difference_detects_to_now() {
        let now = Utc::now();
        let mut prev = check_with_headers(&[]);
        prev.checksum = Some("136bd31d53340d234957650e042172705bf32984".to_string());
        let detection = checksum_detection("aaaa", Some(&prev), now).unwrap();
        assert_eq!(detection.source, ModifiedSource::ComputedChecksum);
        assert_eq!(detection.at, now);

        prev.checksum = Some("aaaa".to_string());
        assert!(checksum_detection("aaaa", Some(&prev), now).is_none());
        assert!(checksum_detection("aaaa", None, now).is_none());
    }
}
