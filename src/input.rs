//! Thin input collaborator: CSV loading with the German column mapping and
//! the row-range / smart-read semantics of the upstream data source.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use phonescout_core::config::DataConfig;
use phonescout_core::InputRecord;

/// Which slice of the input to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowRange {
    pub skip: usize,
    pub limit: Option<usize>,
}

/// Parse `"N-M" | "N-" | "-M" | "N" | "" | "0"` into a skip/limit pair.
/// Invalid expressions fall back to "all rows" with a warning.
pub fn parse_row_range(raw: &str) -> RowRange {
    let raw = raw.trim();
    if raw.is_empty() || raw == "0" {
        return RowRange::default();
    }

    if let Some((start_str, end_str)) = raw.split_once('-') {
        let start = start_str.trim().parse::<usize>().ok();
        let end = end_str.trim().parse::<usize>().ok();
        return match (start, end) {
            (Some(start), Some(end)) if start > 0 && end >= start => RowRange {
                skip: start - 1,
                limit: Some(end - start + 1),
            },
            (Some(start), None) if start > 0 && end_str.trim().is_empty() => RowRange {
                skip: start - 1,
                limit: None,
            },
            (None, Some(end)) if start_str.trim().is_empty() && end > 0 => RowRange {
                skip: 0,
                limit: Some(end),
            },
            _ => {
                warn!(range = raw, "invalid row range expression, processing all rows");
                RowRange::default()
            }
        };
    }

    match raw.parse::<usize>() {
        Ok(n) if n > 0 => RowRange {
            skip: 0,
            limit: Some(n),
        },
        _ => {
            warn!(range = raw, "invalid row range expression, processing all rows");
            RowRange::default()
        }
    }
}

/// Load and map the input table.
///
/// Header mapping: `Unternehmen -> CompanyName`, `Webseite -> GivenURL`,
/// `Telefonnummer -> GivenPhoneNumber`, `Beschreibung -> Description`;
/// English headers are accepted as-is. A missing `TargetCountryCodes`
/// column defaults every row to DE/AT/CH. Open-ended reads stop after the
/// configured number of consecutive empty rows.
pub fn load_input_rows(path: &Path, config: &DataConfig) -> Result<Vec<InputRecord>> {
    let range = parse_row_range(&config.row_range);
    let smart_read = range.limit.is_none() && config.consecutive_empty_rows_to_stop > 0;
    info!(
        path = %path.display(),
        skip = range.skip,
        limit = ?range.limit,
        smart_read,
        "loading input rows"
    );

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("cannot open input file {}", path.display()))?;

    let headers = reader
        .headers()
        .context("input file has no header row")?
        .clone();
    let columns = map_columns(&headers);

    let mut rows = Vec::new();
    let mut consecutive_empty = 0usize;
    let mut data_row = 0u64;

    for record in reader.records() {
        let record = record.context("malformed input row")?;
        data_row += 1;

        if (data_row as usize) <= range.skip {
            continue;
        }
        if let Some(limit) = range.limit {
            if rows.len() >= limit {
                break;
            }
        }

        if record.iter().all(|field| field.trim().is_empty()) {
            consecutive_empty += 1;
            if smart_read && consecutive_empty >= config.consecutive_empty_rows_to_stop {
                info!(
                    after_row = data_row,
                    empty = consecutive_empty,
                    "stopping read after consecutive empty rows"
                );
                break;
            }
            continue;
        }
        consecutive_empty = 0;

        let field = |name: &str| -> Option<String> {
            columns
                .get(name)
                .and_then(|&i| record.get(i))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let company_name = field("CompanyName").unwrap_or_else(|| format!("Row_{data_row}"));
        let target_country_codes = field("TargetCountryCodes")
            .map(|raw| parse_country_codes(&raw))
            .filter(|codes| !codes.is_empty())
            .unwrap_or_else(default_target_countries);

        rows.push(InputRecord {
            row_id: data_row,
            company_name,
            given_url: field("GivenURL"),
            given_phone: field("GivenPhoneNumber"),
            description: field("Description"),
            target_country_codes,
        });
    }

    info!(rows = rows.len(), "input loaded");
    Ok(rows)
}

fn map_columns(headers: &csv::StringRecord) -> HashMap<String, usize> {
    let mut columns = HashMap::new();
    for (i, header) in headers.iter().enumerate() {
        let canonical = match header.trim() {
            "Unternehmen" => "CompanyName",
            "Webseite" => "GivenURL",
            "Telefonnummer" => "GivenPhoneNumber",
            "Beschreibung" => "Description",
            other => other,
        };
        columns.entry(canonical.to_string()).or_insert(i);
    }
    columns
}

/// Accept both `DE,AT` and `[DE, AT]` notations.
fn parse_country_codes(raw: &str) -> Vec<String> {
    raw.trim_matches(['[', ']'])
        .split(',')
        .map(|s| s.trim().trim_matches(['\'', '"']).to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn default_target_countries() -> Vec<String> {
    vec!["DE".to_string(), "AT".to_string(), "CH".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn data_config(range: &str) -> DataConfig {
        DataConfig {
            row_range: range.to_string(),
            ..DataConfig::default()
        }
    }

    #[test]
    fn range_expressions() {
        assert_eq!(parse_row_range(""), RowRange { skip: 0, limit: None });
        assert_eq!(parse_row_range("0"), RowRange { skip: 0, limit: None });
        assert_eq!(parse_row_range("2-5"), RowRange { skip: 1, limit: Some(4) });
        assert_eq!(parse_row_range("3-"), RowRange { skip: 2, limit: None });
        assert_eq!(parse_row_range("-4"), RowRange { skip: 0, limit: Some(4) });
        assert_eq!(parse_row_range("7"), RowRange { skip: 0, limit: Some(7) });
        // End before start is invalid and falls back to everything.
        assert_eq!(parse_row_range("5-2"), RowRange { skip: 0, limit: None });
    }

    #[test]
    fn german_headers_are_mapped() {
        let file = write_csv(
            "Unternehmen,Webseite,Telefonnummer,Beschreibung\n\
             Acme GmbH,acme.de,+49 30 123456,Maschinenbau\n",
        );
        let rows = load_input_rows(file.path(), &data_config("")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].company_name, "Acme GmbH");
        assert_eq!(rows[0].given_url.as_deref(), Some("acme.de"));
        assert_eq!(rows[0].given_phone.as_deref(), Some("+49 30 123456"));
        assert_eq!(rows[0].target_country_codes, vec!["DE", "AT", "CH"]);
    }

    #[test]
    fn target_countries_column_overrides_default() {
        let file = write_csv(
            "CompanyName,GivenURL,TargetCountryCodes\n\
             A,a.de,\"[DE, CH]\"\n\
             B,b.at,AT\n",
        );
        let rows = load_input_rows(file.path(), &data_config("")).unwrap();
        assert_eq!(rows[0].target_country_codes, vec!["DE", "CH"]);
        assert_eq!(rows[1].target_country_codes, vec!["AT"]);
    }

    #[test]
    fn row_range_selects_a_window() {
        let file = write_csv(
            "CompanyName,GivenURL\nA,a.de\nB,b.de\nC,c.de\nD,d.de\n",
        );
        let rows = load_input_rows(file.path(), &data_config("2-3")).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.company_name.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);
        assert_eq!(rows[0].row_id, 2);
    }

    #[test]
    fn smart_read_stops_after_consecutive_empty_rows() {
        let file = write_csv(
            "CompanyName,GivenURL\nA,a.de\n,\n,\n,\nZ,z.de\n",
        );
        let rows = load_input_rows(file.path(), &data_config("")).unwrap();
        // Three empty rows end the read; Z is never seen.
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].company_name, "A");
    }

    #[test]
    fn bounded_reads_ignore_empty_row_stop() {
        let file = write_csv(
            "CompanyName,GivenURL\nA,a.de\n,\n,\n,\nZ,z.de\n",
        );
        let rows = load_input_rows(file.path(), &data_config("-5")).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.company_name.as_str()).collect();
        assert_eq!(names, vec!["A", "Z"]);
    }

    #[test]
    fn empty_file_loads_zero_rows() {
        let file = write_csv("CompanyName,GivenURL\n");
        let rows = load_input_rows(file.path(), &data_config("")).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn missing_url_is_none_and_company_gets_placeholder() {
        let file = write_csv("CompanyName,GivenURL\n,x.de\n");
        let rows = load_input_rows(file.path(), &data_config("")).unwrap();
        assert_eq!(rows[0].company_name, "Row_1");
        assert_eq!(rows[0].given_url.as_deref(), Some("x.de"));
    }
}
