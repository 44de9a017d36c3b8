use crate::aggregation::types::{AggregatedRecord, AggregatedTable, RawTable, SITE_PREFIX};
use crate::aggregation::utility::mean;
use crate::error::{Result, TelemetryError};
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Running sums for one (hour, site) group.
#[derive(Debug, Default)]
struct Group {
    temperatures: Vec<f64>,
    loads: Vec<f64>,
    users: u64,
    indicators: Vec<f64>,
}

/// Collapses raw per-technology rows into one record per (hour, site).
///
/// Temperature and resource-block load are averaged, users and every
/// `tech_*` indicator are summed, and the site is one-hot encoded into
/// `site_<value>` columns. Sites keep their order of first appearance, which
/// also orders rows sharing an hour.
pub fn aggregate(raw: &RawTable) -> Result<AggregatedTable> {
    let mut sites: Vec<&str> = Vec::new();
    let mut groups: BTreeMap<(DateTime<Utc>, usize), Group> = BTreeMap::new();
    let width = raw.indicator_columns.len();

    for record in &raw.records {
        let site = match sites.iter().position(|s| *s == record.site) {
            Some(index) => index,
            None => {
                sites.push(&record.site);
                sites.len() - 1
            }
        };

        if record.indicators.len() != width {
            return Err(TelemetryError::Schema(format!(
                "record at {} has {} indicator values, expected {width}",
                record.timestamp,
                record.indicators.len()
            )));
        }

        let group = groups
            .entry((floor_to_hour(record.timestamp)?, site))
            .or_insert_with(|| Group {
                indicators: vec![0.0; width],
                ..Group::default()
            });
        group.temperatures.push(record.temperature);
        group.loads.push(record.resource_block_load as f64);
        group.users = group.users.checked_add(record.users).ok_or_else(|| {
            TelemetryError::Schema(format!(
                "users for {} at {} overflow the hourly sum",
                record.site, record.timestamp
            ))
        })?;
        for (sum, value) in group.indicators.iter_mut().zip(&record.indicators) {
            *sum += value;
        }
    }

    let records = groups
        .into_iter()
        .map(|((ds, site), group)| {
            let mut one_hot = vec![0u8; sites.len()];
            one_hot[site] = 1;
            AggregatedRecord {
                ds,
                y: mean(&group.temperatures),
                resource_block_load: mean(&group.loads),
                users: group.users,
                indicators: group.indicators,
                sites: one_hot,
            }
        })
        .collect::<Vec<_>>();

    debug!(
        raw_rows = raw.len(),
        groups = records.len(),
        sites = sites.len(),
        "Aggregated hourly records"
    );

    Ok(AggregatedTable {
        indicator_columns: raw.indicator_columns.clone(),
        site_columns: sites.iter().map(|s| format!("{SITE_PREFIX}{s}")).collect(),
        records,
    })
}

pub fn floor_to_hour(ts: DateTime<Utc>) -> Result<DateTime<Utc>> {
    ts.duration_trunc(Duration::hours(1))
        .map_err(|e| TelemetryError::Schema(format!("cannot floor {ts} to the hour: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::types::RawRecord;
    use chrono::TimeZone;

    fn raw(minute: u32, hour: u32, site: &str, users: u64, temperature: f64) -> RawRecord {
        RawRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, hour, minute, 0).unwrap(),
            site: site.to_string(),
            technology: "4G".to_string(),
            users,
            resource_block_load: 200,
            temperature,
            indicators: Vec::new(),
        }
    }

    #[test]
    fn test_two_rows_in_one_hour() {
        let table = RawTable {
            indicator_columns: Vec::new(),
            records: vec![raw(0, 0, "Site_A", 10, 20.0), raw(0, 0, "Site_A", 5, 22.0)],
        };

        let out = aggregate(&table).unwrap();

        assert_eq!(out.len(), 1);
        let row = &out.records[0];
        assert_eq!(row.ds, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(row.y, 21.0);
        assert_eq!(row.users, 15);
        assert_eq!(row.resource_block_load, 200.0);
        assert_eq!(out.site_columns, vec!["site_Site_A"]);
        assert_eq!(row.sites, vec![1]);
    }

    #[test]
    fn test_empty_input_keeps_schema() {
        let table = RawTable {
            indicator_columns: vec!["tech_massive_mimo".to_string()],
            records: Vec::new(),
        };

        let out = aggregate(&table).unwrap();

        assert!(out.is_empty());
        assert_eq!(
            out.columns(),
            vec!["ds", "y", "resource_block_load", "users", "tech_massive_mimo"]
        );
    }

    #[test]
    fn test_rows_sorted_by_hour_then_first_appearance() {
        let table = RawTable {
            indicator_columns: Vec::new(),
            records: vec![
                raw(50, 1, "Site_B", 1, 30.0),
                raw(10, 0, "Site_B", 1, 30.0),
                raw(20, 0, "Site_A", 1, 25.0),
                raw(59, 1, "Site_A", 1, 25.0),
            ],
        };

        let out = aggregate(&table).unwrap();
        let order: Vec<_> = out
            .records
            .iter()
            .map(|r| (r.ds.format("%H").to_string(), out.site_of(r).unwrap().to_string()))
            .collect();

        assert_eq!(out.site_columns, vec!["site_Site_B", "site_Site_A"]);
        assert_eq!(
            order,
            vec![
                ("00".to_string(), "Site_B".to_string()),
                ("00".to_string(), "Site_A".to_string()),
                ("01".to_string(), "Site_B".to_string()),
                ("01".to_string(), "Site_A".to_string()),
            ]
        );
    }

    #[test]
    fn test_indicator_columns_are_summed() {
        let mut a = raw(0, 0, "Site_A", 1, 20.0);
        a.indicators = vec![1.0, 0.5];
        let mut b = raw(30, 0, "Site_A", 1, 20.0);
        b.indicators = vec![1.0, 2.0];
        let table = RawTable {
            indicator_columns: vec!["tech_a".to_string(), "tech_b".to_string()],
            records: vec![a, b],
        };

        let out = aggregate(&table).unwrap();
        assert_eq!(out.records[0].indicators, vec![2.0, 2.5]);
    }

    #[test]
    fn test_aggregates_generated_csv() {
        let csv = "\
timestamp,site,technology,users,resource_block_load,temperature
2025-01-01T00:00:00Z,Site_A,4G,10,100,20.0
2025-01-01T00:10:00Z,Site_A,5G,5,300,22.0
2025-01-01T00:10:00Z,Site_B,4G,7,200,31.0
";
        let out = aggregate(&RawTable::from_reader(csv.as_bytes()).unwrap()).unwrap();

        let mut buf = Vec::new();
        out.write_to(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "\
ds,y,resource_block_load,users,site_Site_A,site_Site_B
2025-01-01T00:00:00Z,21.0,200.0,15,1,0
2025-01-01T00:00:00Z,31.0,200.0,7,0,1
"
        );
    }

    #[test]
    fn test_non_numeric_indicator_is_schema_error() {
        let csv = "\
timestamp,site,technology,users,resource_block_load,temperature,tech_5g
2025-01-01T00:00:00Z,Site_A,4G,10,100,20.0,n/a
";
        assert!(matches!(
            RawTable::from_reader(csv.as_bytes()),
            Err(TelemetryError::Schema(_))
        ));
    }

    #[test]
    fn test_users_overflow_is_schema_error() {
        let csv = format!(
            "\
timestamp,site,technology,users,resource_block_load,temperature
2025-01-01T00:00:00Z,Site_A,4G,{max},100,20.0
2025-01-01T00:10:00Z,Site_A,5G,{max},300,22.0
",
            max = u64::MAX
        );
        let raw = RawTable::from_reader(csv.as_bytes()).unwrap();

        match aggregate(&raw).unwrap_err() {
            TelemetryError::Schema(msg) => assert!(msg.contains("Site_A")),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_floor_to_hour() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 17, 59, 59).unwrap();
        assert_eq!(
            floor_to_hour(ts).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 4, 17, 0, 0).unwrap()
        );
    }
}
