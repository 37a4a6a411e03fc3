//! Typed report rows and the builders that fill them.

use std::collections::BTreeSet;

use serde::Serialize;
use url::Url;

use phonescout_core::{ConsolidatedNumber, SiteContactDetails};

use crate::consolidate::is_top_contact_eligible;

/// One row per input row.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SummaryRow {
    #[serde(rename = "InputRowID")]
    pub input_row_id: u64,
    #[serde(rename = "CompanyName")]
    pub company_name: String,
    #[serde(rename = "GivenURL")]
    pub given_url: String,
    #[serde(rename = "GivenPhoneNumber")]
    pub given_phone: String,
    #[serde(rename = "NormalizedGivenPhoneNumber")]
    pub normalized_given_phone: String,
    #[serde(rename = "Original_Number_Status")]
    pub original_number_status: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "ScrapingStatus")]
    pub scraping_status: String,
    #[serde(rename = "CanonicalEntryURL")]
    pub canonical_entry_url: String,
    #[serde(rename = "Top_Number_1")]
    pub top_number_1: String,
    #[serde(rename = "Top_Type_1")]
    pub top_type_1: String,
    #[serde(rename = "Top_SourceURL_1")]
    pub top_source_url_1: String,
    #[serde(rename = "Top_Number_2")]
    pub top_number_2: String,
    #[serde(rename = "Top_Type_2")]
    pub top_type_2: String,
    #[serde(rename = "Top_SourceURL_2")]
    pub top_source_url_2: String,
    #[serde(rename = "Top_Number_3")]
    pub top_number_3: String,
    #[serde(rename = "Top_Type_3")]
    pub top_type_3: String,
    #[serde(rename = "Top_SourceURL_3")]
    pub top_source_url_3: String,
    #[serde(rename = "Final_Row_Outcome_Reason")]
    pub outcome_reason: String,
    #[serde(rename = "Determined_Fault_Category")]
    pub fault_category: String,
    #[serde(rename = "RunID")]
    pub run_id: String,
}

/// One row per classified number per canonical site.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedRow {
    #[serde(rename = "InputRowID")]
    pub input_row_id: u64,
    #[serde(rename = "CompanyName")]
    pub company_name: String,
    #[serde(rename = "GivenURL")]
    pub given_url: String,
    #[serde(rename = "CanonicalEntryURL")]
    pub canonical_entry_url: String,
    #[serde(rename = "Number")]
    pub number: String,
    #[serde(rename = "LLM_Type")]
    pub llm_type: String,
    #[serde(rename = "LLM_Classification")]
    pub llm_classification: String,
    #[serde(rename = "LLM_Source_URL")]
    pub llm_source_url: String,
    #[serde(rename = "ScrapingStatus")]
    pub scraping_status: String,
    #[serde(rename = "TargetCountryCodes")]
    pub target_country_codes: String,
    #[serde(rename = "RunID")]
    pub run_id: String,
}

/// One row per canonical site, aggregated over every input row mapping to it.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TopContactsRow {
    #[serde(rename = "CompanyName")]
    pub company_name: String,
    #[serde(rename = "GivenURL")]
    pub given_urls: String,
    #[serde(rename = "CanonicalEntryURL")]
    pub canonical_entry_url: String,
    #[serde(rename = "ScrapingStatus")]
    pub scraping_status: String,
    #[serde(rename = "PhoneNumber_1")]
    pub phone_number_1: String,
    #[serde(rename = "PhoneNumber_2")]
    pub phone_number_2: String,
    #[serde(rename = "PhoneNumber_3")]
    pub phone_number_3: String,
    #[serde(rename = "SourceURL_1")]
    pub source_url_1: String,
    #[serde(rename = "SourceURL_2")]
    pub source_url_2: String,
    #[serde(rename = "SourceURL_3")]
    pub source_url_3: String,
}

/// Post-processed view of the Top-Contacts report: one clean number per site.
#[derive(Debug, Clone, Serialize)]
pub struct FinalContactRow {
    #[serde(rename = "CompanyName")]
    pub company_name: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "PhoneNumberType")]
    pub phone_number_type: String,
    #[serde(rename = "SourceURL")]
    pub source_url: String,
}

/// One row per input row in the attrition workbook.
#[derive(Debug, Clone, Serialize)]
pub struct AttritionRow {
    #[serde(rename = "InputRowID")]
    pub input_row_id: u64,
    #[serde(rename = "CompanyName")]
    pub company_name: String,
    #[serde(rename = "GivenURL")]
    pub given_url: String,
    #[serde(rename = "Final_Row_Outcome_Reason")]
    pub outcome_reason: String,
    #[serde(rename = "Determined_Fault_Category")]
    pub fault_category: String,
    #[serde(rename = "Relevant_Canonical_URLs")]
    pub relevant_canonical_urls: String,
    #[serde(rename = "LLM_Error_Detail_Summary")]
    pub llm_error_detail: String,
    #[serde(rename = "Timestamp_Of_Determination")]
    pub timestamp: String,
}

/// `"<host> - <company A> - <company B>"` label for aggregated site rows.
pub fn aggregate_company_label(canonical_url: &str, companies: &BTreeSet<String>) -> String {
    let host = Url::parse(canonical_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| canonical_url.to_string());
    if companies.is_empty() {
        host
    } else {
        let joined: Vec<&str> = companies.iter().map(String::as_str).collect();
        format!("{host} - {}", joined.join(" - "))
    }
}

/// Sorted unique source types of a consolidated number, comma-joined.
pub fn joined_types(number: &ConsolidatedNumber) -> String {
    let types: BTreeSet<&str> = number.sources.iter().map(|s| s.phone_type.as_str()).collect();
    types.into_iter().collect::<Vec<_>>().join(", ")
}

/// Sorted unique source URLs of a consolidated number, comma-joined.
pub fn joined_source_urls(number: &ConsolidatedNumber) -> String {
    let urls: BTreeSet<&str> = number.sources.iter().map(|s| s.source_url.as_str()).collect();
    urls.into_iter().collect::<Vec<_>>().join(", ")
}

/// The top numbers surviving the Top-Contacts filter, best first.
pub fn eligible_numbers(details: &SiteContactDetails) -> Vec<&ConsolidatedNumber> {
    details
        .consolidated_numbers
        .iter()
        .filter(|n| is_top_contact_eligible(n))
        .collect()
}

/// `"<number> (<types>) [<companies>]"` cell for the Top-Contacts report.
pub fn top_contact_cell(number: &ConsolidatedNumber) -> String {
    let companies: BTreeSet<&str> = number
        .sources
        .iter()
        .map(|s| s.original_input_company_name.as_str())
        .filter(|s| !s.is_empty())
        .collect();
    let companies = if companies.is_empty() {
        "UnknownCompany".to_string()
    } else {
        companies.into_iter().collect::<Vec<_>>().join(", ")
    };
    format!("{} ({}) [{}]", number.number, joined_types(number), companies)
}

/// Build a Top-Contacts row, or `None` when no number survives the filter.
pub fn build_top_contacts_row(
    company_label: String,
    given_urls: String,
    canonical_url: &str,
    scraping_status: &str,
    details: &SiteContactDetails,
) -> Option<TopContactsRow> {
    let eligible = eligible_numbers(details);
    if eligible.is_empty() {
        return None;
    }

    let mut row = TopContactsRow {
        company_name: company_label,
        given_urls,
        canonical_entry_url: canonical_url.to_string(),
        scraping_status: scraping_status.to_string(),
        ..TopContactsRow::default()
    };
    for (i, number) in eligible.iter().take(3).enumerate() {
        let cell = top_contact_cell(number);
        let sources = joined_source_urls(number);
        match i {
            0 => {
                row.phone_number_1 = cell;
                row.source_url_1 = sources;
            }
            1 => {
                row.phone_number_2 = cell;
                row.source_url_2 = sources;
            }
            _ => {
                row.phone_number_3 = cell;
                row.source_url_3 = sources;
            }
        }
    }
    Some(row)
}

/// Derive the post-processed contact rows from the Top-Contacts rows.
pub fn build_final_contact_rows(top_rows: &[TopContactsRow]) -> Vec<FinalContactRow> {
    top_rows
        .iter()
        .filter(|row| !row.phone_number_1.is_empty())
        .map(|row| {
            let base_domain = row
                .company_name
                .split(" - ")
                .next()
                .unwrap_or(&row.company_name)
                .to_string();
            let (number, phone_type) = split_top_cell(&row.phone_number_1);
            FinalContactRow {
                company_name: base_domain,
                phone_number: number,
                phone_number_type: phone_type,
                source_url: row.source_url_1.clone(),
            }
        })
        .collect()
}

/// Split `"<number> (<types>) [...]"` into the bare number and its first type.
fn split_top_cell(cell: &str) -> (String, String) {
    let number = cell.split(" (").next().unwrap_or(cell).trim().to_string();
    let phone_type = cell
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(types, _)| types.split(',').next().unwrap_or("").trim().to_string())
        .unwrap_or_default();
    (number, phone_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonescout_core::NumberSource;

    fn details() -> SiteContactDetails {
        let source = |phone_type: &str, url: &str, company: &str| NumberSource {
            phone_type: phone_type.to_string(),
            source_path: "/".to_string(),
            source_url: url.to_string(),
            original_input_company_name: company.to_string(),
        };
        SiteContactDetails {
            canonical_url: "http://site.tld".to_string(),
            company_name: Some("A".to_string()),
            consolidated_numbers: vec![
                ConsolidatedNumber {
                    number: "+4930111111".to_string(),
                    classification: "Primary".to_string(),
                    sources: vec![
                        source("Main Line", "http://site.tld/kontakt", "A"),
                        source("Main Line", "http://site.tld/impressum", "B"),
                    ],
                },
                ConsolidatedNumber {
                    number: "+4930222222".to_string(),
                    classification: "Primary".to_string(),
                    sources: vec![source("Fax", "http://site.tld/kontakt", "A")],
                },
                ConsolidatedNumber {
                    number: "+4930333333".to_string(),
                    classification: "Support".to_string(),
                    sources: vec![source("Support", "http://site.tld/hilfe", "A")],
                },
            ],
            original_input_urls: vec!["http://site.tld/contact".to_string()],
        }
    }

    #[test]
    fn aggregate_label_matches_expected_format() {
        let companies: BTreeSet<String> = ["B".to_string(), "A".to_string()].into_iter().collect();
        assert_eq!(aggregate_company_label("http://site.tld", &companies), "site.tld - A - B");
    }

    #[test]
    fn top_row_skips_filtered_numbers_and_formats_cells() {
        let row = build_top_contacts_row(
            "site.tld - A - B".to_string(),
            "http://site.tld/contact, http://www.site.tld/".to_string(),
            "http://site.tld",
            "Success",
            &details(),
        )
        .expect("eligible numbers exist");

        assert_eq!(row.phone_number_1, "+4930111111 (Main Line) [A, B]");
        // Fax number is filtered out; support line moves up.
        assert_eq!(row.phone_number_2, "+4930333333 (Support) [A]");
        assert!(row.phone_number_3.is_empty());
        assert_eq!(
            row.source_url_1,
            "http://site.tld/impressum, http://site.tld/kontakt"
        );
    }

    #[test]
    fn top_row_is_none_when_everything_is_filtered() {
        let mut d = details();
        d.consolidated_numbers.retain(|n| n.number == "+4930222222");
        let row = build_top_contacts_row(
            "site.tld - A".to_string(),
            String::new(),
            "http://site.tld",
            "Success",
            &d,
        );
        assert!(row.is_none());
    }

    #[test]
    fn final_rows_extract_number_and_type() {
        let top = build_top_contacts_row(
            "site.tld - A".to_string(),
            String::new(),
            "http://site.tld",
            "Success",
            &details(),
        )
        .unwrap();
        let finals = build_final_contact_rows(&[top]);
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].company_name, "site.tld");
        assert_eq!(finals[0].phone_number, "+4930111111");
        assert_eq!(finals[0].phone_number_type, "Main Line");
    }
}
