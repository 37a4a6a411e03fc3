//! Merge per-page classified numbers into one record per unique number.

use std::collections::HashMap;

use tracing::{debug, warn};
use url::Url;

use phonescout_core::{ClassifiedPhone, ConsolidatedNumber, NumberSource, SiteContactDetails};

/// Number types that never make the Top-Contacts report.
pub const EXCLUDED_TYPES_FOR_TOP_CONTACTS: &[&str] = &["Unknown", "Fax", "Mobile", "Date", "ID"];

/// Two-tier sort key: classification tier first, then type preference.
/// Lower is better.
pub fn classification_priority(classification: &str, phone_type: &str) -> (u8, u8) {
    let class_priority = match classification {
        "Primary" => 1,
        "Secondary" => 2,
        "Support" => 3,
        "Low Relevance" => 4,
        "Non-Business" => 5,
        "Unknown" => 6,
        _ => 99,
    };

    let type_priority = match phone_type {
        "Main Line" | "Mainline" => 1,
        "Headquarters" | "Zentrale" => 2,
        "Reception" => 3,
        "Sales" | "Sales Department" => 10,
        "Customer Service" => 11,
        "Support" | "Support Hotline" => 12,
        "Technical Support" => 13,
        "Info-Hotline" => 15,
        "Direct Dial" => 25,
        "Mobile" => 30,
        "Fax" => 80,
        "Unknown" => 99,
        _ => 90,
    };

    (class_priority, type_priority)
}

/// True when a consolidated number may appear in the Top-Contacts report:
/// not Non-Business and none of its source types is excluded.
pub fn is_top_contact_eligible(number: &ConsolidatedNumber) -> bool {
    if number.classification == "Non-Business" {
        return false;
    }
    !number.sources.iter().any(|s| {
        EXCLUDED_TYPES_FOR_TOP_CONTACTS.contains(&s.phone_type.as_str())
    })
}

/// Consolidate every classified number collected for one canonical site.
///
/// Numbers are keyed by their (normalized) value; each record carries the
/// best-priority classification seen across all sources, with the source that
/// set it moved to the front so the representative type is observable.
/// Sources are deduplicated by (full URL, type). Error-tagged items take part
/// like any other number; their Non-Business classification keeps them out of
/// the Top-Contacts report.
pub fn consolidate_site(
    llm_results: &[ClassifiedPhone],
    company_name: Option<&str>,
    canonical_url: &str,
    original_input_urls: &[String],
) -> SiteContactDetails {
    let mut entries: HashMap<String, ((u8, u8), ConsolidatedNumber)> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut skipped_malformed = 0usize;

    for item in llm_results {
        if item.number.is_empty() || item.source_url.is_empty() {
            skipped_malformed += 1;
            continue;
        }

        let priority = classification_priority(&item.classification, &item.phone_type);
        let source = NumberSource {
            phone_type: item.phone_type.clone(),
            source_path: source_path_of(&item.source_url),
            source_url: item.source_url.clone(),
            original_input_company_name: item.original_input_company_name.clone(),
        };

        match entries.get_mut(&item.number) {
            None => {
                order.push(item.number.clone());
                entries.insert(
                    item.number.clone(),
                    (
                        priority,
                        ConsolidatedNumber {
                            number: item.number.clone(),
                            classification: item.classification.clone(),
                            sources: vec![source],
                        },
                    ),
                );
            }
            Some((best, consolidated)) => {
                let duplicate = consolidated.sources.iter().any(|s| {
                    s.source_url == source.source_url && s.phone_type == source.phone_type
                });
                if !duplicate {
                    consolidated.sources.push(source.clone());
                }
                if priority < *best {
                    *best = priority;
                    consolidated.classification = item.classification.clone();
                    // Surface the source that set the best pair as representative.
                    if let Some(pos) = consolidated.sources.iter().position(|s| {
                        s.source_url == source.source_url && s.phone_type == source.phone_type
                    }) {
                        let repr = consolidated.sources.remove(pos);
                        consolidated.sources.insert(0, repr);
                    }
                }
            }
        }
    }

    if skipped_malformed > 0 {
        warn!(
            canonical = canonical_url,
            skipped = skipped_malformed,
            "classified items skipped during consolidation, missing number or source"
        );
    }

    let mut consolidated_numbers: Vec<((u8, u8), ConsolidatedNumber)> = order
        .into_iter()
        .filter_map(|number| entries.remove(&number))
        .collect();
    consolidated_numbers.sort_by_key(|(priority, _)| *priority);

    debug!(
        canonical = canonical_url,
        numbers = consolidated_numbers.len(),
        "site consolidation complete"
    );

    SiteContactDetails {
        canonical_url: canonical_url.to_string(),
        company_name: company_name.map(str::to_string),
        consolidated_numbers: consolidated_numbers.into_iter().map(|(_, n)| n).collect(),
        original_input_urls: original_input_urls.to_vec(),
    }
}

/// Path plus query of a source URL, `/` when the URL has no path.
fn source_path_of(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(url) => {
            let mut path = url.path().to_string();
            if let Some(query) = url.query() {
                path.push('?');
                path.push_str(query);
            }
            if path.is_empty() {
                path.push('/');
            }
            path
        }
        Err(_) => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone(number: &str, phone_type: &str, classification: &str, url: &str) -> ClassifiedPhone {
        ClassifiedPhone {
            number: number.to_string(),
            phone_type: phone_type.to_string(),
            classification: classification.to_string(),
            source_url: url.to_string(),
            original_input_company_name: "Acme GmbH".to_string(),
            error_tag: None,
        }
    }

    #[test]
    fn priority_orders_classification_before_type() {
        assert!(classification_priority("Primary", "Fax") < classification_priority("Secondary", "Main Line"));
        assert!(classification_priority("Primary", "Main Line") < classification_priority("Primary", "Sales"));
        assert_eq!(classification_priority("Nonsense", "Nonsense"), (99, 90));
    }

    #[test]
    fn same_number_keeps_best_classification_pair() {
        let results = [
            phone("+4930123456", "Fax", "Secondary", "http://acme.de/impressum"),
            phone("+4930123456", "Main Line", "Primary", "http://acme.de/kontakt"),
        ];
        let details = consolidate_site(&results, Some("Acme GmbH"), "http://acme.de", &[]);
        assert_eq!(details.consolidated_numbers.len(), 1);
        let number = &details.consolidated_numbers[0];
        assert_eq!(number.classification, "Primary");
        // The best-pair source is representative.
        assert_eq!(number.sources[0].phone_type, "Main Line");
        // No source under the record beats the recorded pair.
        let best = classification_priority(&number.classification, &number.sources[0].phone_type);
        for source in &number.sources {
            assert!(classification_priority(&number.classification, &source.phone_type) >= best);
        }
    }

    #[test]
    fn sources_dedupe_on_url_and_type() {
        let results = [
            phone("+4930123456", "Main Line", "Primary", "http://acme.de/kontakt"),
            phone("+4930123456", "Main Line", "Primary", "http://acme.de/kontakt"),
            phone("+4930123456", "Sales", "Primary", "http://acme.de/kontakt"),
        ];
        let details = consolidate_site(&results, None, "http://acme.de", &[]);
        assert_eq!(details.consolidated_numbers[0].sources.len(), 2);
    }

    #[test]
    fn list_is_sorted_by_priority() {
        let results = [
            phone("+4930000001", "Fax", "Low Relevance", "http://acme.de/a"),
            phone("+4930000002", "Main Line", "Primary", "http://acme.de/b"),
            phone("+4930000003", "Support", "Support", "http://acme.de/c"),
        ];
        let details = consolidate_site(&results, None, "http://acme.de", &[]);
        let numbers: Vec<&str> = details
            .consolidated_numbers
            .iter()
            .map(|n| n.number.as_str())
            .collect();
        assert_eq!(numbers, vec!["+4930000002", "+4930000003", "+4930000001"]);
    }

    #[test]
    fn malformed_items_are_skipped() {
        let mut bad = phone("", "Main Line", "Primary", "http://acme.de");
        bad.number = String::new();
        let details = consolidate_site(&[bad], None, "http://acme.de", &[]);
        assert!(details.consolidated_numbers.is_empty());
    }

    #[test]
    fn top_contacts_eligibility_filters_types_and_classification() {
        let fax = consolidate_site(
            &[phone("+4930000001", "Fax", "Primary", "http://acme.de/a")],
            None,
            "http://acme.de",
            &[],
        );
        assert!(!is_top_contact_eligible(&fax.consolidated_numbers[0]));

        let non_business = consolidate_site(
            &[phone("+4930000002", "Main Line", "Non-Business", "http://acme.de/a")],
            None,
            "http://acme.de",
            &[],
        );
        assert!(!is_top_contact_eligible(&non_business.consolidated_numbers[0]));

        let good = consolidate_site(
            &[phone("+4930000003", "Main Line", "Primary", "http://acme.de/a")],
            None,
            "http://acme.de",
            &[],
        );
        assert!(is_top_contact_eligible(&good.consolidated_numbers[0]));
    }

    #[test]
    fn source_paths_carry_query_strings() {
        let results = [phone("+4930123456", "Main Line", "Primary", "http://acme.de/kontakt?lang=de")];
        let details = consolidate_site(&results, None, "http://acme.de", &[]);
        assert_eq!(details.consolidated_numbers[0].sources[0].source_path, "/kontakt?lang=de");
    }
}
