// CSV extract loading

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use chrono::{Datelike, NaiveDate};

use auditgrid_engine::config::DataConfig;
use auditgrid_engine::model::{
    CustomerRecord, Dataset, InvoiceRecord, OrderRecord, ProductRecord, ShipmentRecord,
    TerritoryRecord,
};

use crate::IoError;

/// Per-table load accounting. `skipped` rows lacked a parseable primary key;
/// `coerced` counts non-empty values that failed to parse and became `None`.
#[derive(Debug, Clone)]
pub struct LoadStats {
    pub table: String,
    pub rows: usize,
    pub skipped: usize,
    pub coerced: usize,
}

impl LoadStats {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            rows: 0,
            skipped: 0,
            coerced: 0,
        }
    }

    fn log(&self) {
        if self.skipped > 0 || self.coerced > 0 {
            log::warn!(
                "{}: {} rows loaded, {} skipped, {} values coerced to null",
                self.table,
                self.rows,
                self.skipped,
                self.coerced
            );
        } else {
            log::info!("{}: {} rows loaded", self.table, self.rows);
        }
    }
}

/// Load all six engagement extracts named by the config.
pub fn load_dataset(config: &DataConfig) -> Result<Dataset, IoError> {
    let dir = Path::new(&config.dir);
    let (invoices, s1) = load_invoices(&dir.join(&config.customer_invoices))?;
    let (orders, s2) = load_orders(&dir.join(&config.sales_orders))?;
    let (shipments, s3) = load_shipments(&dir.join(&config.shipments))?;
    let (customers, s4) = load_customers(&dir.join(&config.customer_master))?;
    let (products, s5) = load_products(&dir.join(&config.products))?;
    let (territories, s6) = load_territories(&dir.join(&config.sales_territory))?;
    for stats in [&s1, &s2, &s3, &s4, &s5, &s6] {
        stats.log();
    }
    Ok(Dataset {
        invoices,
        orders,
        shipments,
        customers,
        products,
        territories,
    })
}

// ---------------------------------------------------------------------------
// Table loaders
// ---------------------------------------------------------------------------

pub fn load_invoices(path: &Path) -> Result<(Vec<InvoiceRecord>, LoadStats), IoError> {
    let table = read_table(path)?;
    let mut stats = LoadStats::new("customer_invoices");
    let invoice_id = table.require(path, "InvoiceID")?;
    let cust_id = table.column("CustID");
    let invoice_date = table.column("InvoiceDate");
    let paid_date = table.column("PaidDate");
    let sales_order_id = table.column("SalesOrderID");

    let mut records = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let id = match parse_i64(row.get(invoice_id), &mut stats) {
            Some(id) => id,
            None => {
                stats.skipped += 1;
                continue;
            }
        };
        records.push(InvoiceRecord {
            invoice_id: id,
            cust_id: cust_id.and_then(|c| parse_i64(row.get(c), &mut stats)),
            invoice_date: invoice_date.and_then(|c| parse_date(row.get(c), &mut stats)),
            paid_date: paid_date.and_then(|c| parse_paid_date(row.get(c), &mut stats)),
            sales_order_id: sales_order_id.and_then(|c| parse_i64(row.get(c), &mut stats)),
        });
        stats.rows += 1;
    }
    Ok((records, stats))
}

pub fn load_orders(path: &Path) -> Result<(Vec<OrderRecord>, LoadStats), IoError> {
    let table = read_table(path)?;
    let mut stats = LoadStats::new("sales_orders");
    let sales_order_id = table.require(path, "SalesOrderID")?;
    let cust_id = table.column("CustID");
    let territory_id = table.column("TerritoryID");
    let prod_id = table.column("ProdID");
    let sub_total = table.column("SubTotal");
    let total_due = table.column("TotalDue");
    let ship_id = table.column("ShipID");
    let invoice_id = table.column("InvoiceID");
    let order_date = table.column("OrderDate");
    let credit_approval = table.column("CredApr");

    let mut records = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let id = match parse_i64(row.get(sales_order_id), &mut stats) {
            Some(id) => id,
            None => {
                stats.skipped += 1;
                continue;
            }
        };
        records.push(OrderRecord {
            sales_order_id: id,
            cust_id: cust_id.and_then(|c| parse_i64(row.get(c), &mut stats)),
            territory_id: territory_id.and_then(|c| parse_i64(row.get(c), &mut stats)),
            prod_id: prod_id.and_then(|c| parse_i64(row.get(c), &mut stats)),
            sub_total: sub_total.and_then(|c| parse_f64(row.get(c), &mut stats)),
            total_due: total_due.and_then(|c| parse_f64(row.get(c), &mut stats)),
            ship_id: ship_id.and_then(|c| parse_i64(row.get(c), &mut stats)),
            invoice_id: invoice_id.and_then(|c| parse_i64(row.get(c), &mut stats)),
            order_date: order_date.and_then(|c| parse_date(row.get(c), &mut stats)),
            credit_approval: credit_approval.and_then(|c| non_empty(row.get(c))),
        });
        stats.rows += 1;
    }
    Ok((records, stats))
}

pub fn load_shipments(path: &Path) -> Result<(Vec<ShipmentRecord>, LoadStats), IoError> {
    let table = read_table(path)?;
    let mut stats = LoadStats::new("shipments");
    let ship_id = table.require(path, "ShipID")?;
    let sales_order_id = table.column("SalesOrderID");
    let ship_date = table.column("ShipDate");

    let mut records = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let id = match parse_i64(row.get(ship_id), &mut stats) {
            Some(id) => id,
            None => {
                stats.skipped += 1;
                continue;
            }
        };
        records.push(ShipmentRecord {
            ship_id: id,
            sales_order_id: sales_order_id.and_then(|c| parse_i64(row.get(c), &mut stats)),
            ship_date: ship_date.and_then(|c| parse_date(row.get(c), &mut stats)),
        });
        stats.rows += 1;
    }
    Ok((records, stats))
}

pub fn load_customers(path: &Path) -> Result<(Vec<CustomerRecord>, LoadStats), IoError> {
    let table = read_table(path)?;
    let mut stats = LoadStats::new("customer_master");
    let cust_id = table.require(path, "CustID")?;
    let cust_name = table.column("CustName");
    let territory_id = table.column("TerritoryID");
    let credit_limit = table.column("CredLimit");

    let mut records = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let id = match parse_i64(row.get(cust_id), &mut stats) {
            Some(id) => id,
            None => {
                stats.skipped += 1;
                continue;
            }
        };
        records.push(CustomerRecord {
            cust_id: id,
            cust_name: cust_name.and_then(|c| non_empty(row.get(c))),
            territory_id: territory_id.and_then(|c| parse_i64(row.get(c), &mut stats)),
            credit_limit: credit_limit.and_then(|c| parse_f64(row.get(c), &mut stats)),
        });
        stats.rows += 1;
    }
    Ok((records, stats))
}

pub fn load_products(path: &Path) -> Result<(Vec<ProductRecord>, LoadStats), IoError> {
    let table = read_table(path)?;
    let mut stats = LoadStats::new("products");
    let prod_id = table.require(path, "ProdID")?;
    let prod_name = table.column("ProdName");

    let mut records = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let id = match parse_i64(row.get(prod_id), &mut stats) {
            Some(id) => id,
            None => {
                stats.skipped += 1;
                continue;
            }
        };
        records.push(ProductRecord {
            prod_id: id,
            prod_name: prod_name.and_then(|c| non_empty(row.get(c))),
        });
        stats.rows += 1;
    }
    Ok((records, stats))
}

pub fn load_territories(path: &Path) -> Result<(Vec<TerritoryRecord>, LoadStats), IoError> {
    let table = read_table(path)?;
    let mut stats = LoadStats::new("sales_territory");
    let territory_id = table.require(path, "TerritoryID")?;
    let territory_name = table.column("TerritoryName");

    let mut records = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let id = match parse_i64(row.get(territory_id), &mut stats) {
            Some(id) => id,
            None => {
                stats.skipped += 1;
                continue;
            }
        };
        records.push(TerritoryRecord {
            territory_id: id,
            territory_name: territory_name.and_then(|c| non_empty(row.get(c))),
        });
        stats.rows += 1;
    }
    Ok((records, stats))
}

/// Load the client's aging table as raw header-to-value rows. Header synonym
/// resolution belongs to the engine, not the loader.
pub fn load_client_aging(path: &Path) -> Result<Vec<BTreeMap<String, String>>, IoError> {
    let table = read_table(path)?;
    let rows = table
        .rows
        .iter()
        .map(|row| {
            table
                .headers
                .iter()
                .enumerate()
                .filter_map(|(i, header)| {
                    row.get(i)
                        .filter(|v| !v.trim().is_empty())
                        .map(|v| (header.clone(), v.to_string()))
                })
                .collect()
        })
        .collect();
    log::info!("client_aging: {} rows loaded", table.rows.len());
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Raw table reading
// ---------------------------------------------------------------------------

struct RawTable {
    headers: Vec<String>,
    rows: Vec<csv::StringRecord>,
}

impl RawTable {
    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn require(&self, path: &Path, name: &str) -> Result<usize, IoError> {
        self.column(name).ok_or_else(|| IoError::MissingColumn {
            path: path.display().to_string(),
            column: name.to_string(),
        })
    }
}

fn read_table(path: &Path) -> Result<RawTable, IoError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if extension.as_deref() != Some("csv") {
        return Err(IoError::UnsupportedFormat(path.display().to_string()));
    }

    let content = read_file_as_utf8(path)?;
    let delimiter = sniff_delimiter(&content);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| csv_error(path, e))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record.map_err(|e| csv_error(path, e))?);
    }
    Ok(RawTable { headers, rows })
}

fn csv_error(path: &Path, error: csv::Error) -> IoError {
    IoError::Csv {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

/// Read file and convert to UTF-8 if needed (handles Windows-1252 from
/// Excel-exported CSVs).
fn read_file_as_utf8(path: &Path) -> Result<String, IoError> {
    let read_err = |source| IoError::Read {
        path: path.display().to_string(),
        source,
    };
    let mut file = std::fs::File::open(path).map_err(read_err)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(read_err)?;

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

/// Detect the most likely field delimiter by checking consistency across the
/// first few lines. The delimiter producing the most consistent field count
/// (>1 field) wins; higher field counts break ties.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        if counts.first().copied().unwrap_or(0) <= 1 {
            continue;
        }

        let target = counts[0];
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

// ---------------------------------------------------------------------------
// Value coercion
// ---------------------------------------------------------------------------

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
        .map(str::to_string)
}

fn parse_i64(value: Option<&str>, stats: &mut LoadStats) -> Option<i64> {
    let value = non_empty(value)?;
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    // Excel exports integer IDs as "123.0".
    if let Ok(f) = value.parse::<f64>() {
        if f.fract() == 0.0 {
            return Some(f as i64);
        }
    }
    stats.coerced += 1;
    None
}

fn parse_f64(value: Option<&str>, stats: &mut LoadStats) -> Option<f64> {
    let value = non_empty(value)?;
    match value.replace(['$', ','], "").parse::<f64>() {
        Ok(f) => Some(f),
        Err(_) => {
            stats.coerced += 1;
            None
        }
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y-%m-%d %H:%M:%S", "%m/%d/%Y", "%m/%d/%y"];

fn parse_date(value: Option<&str>, stats: &mut LoadStats) -> Option<NaiveDate> {
    let value = non_empty(value)?;
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&value, format) {
            return Some(date);
        }
        if let Ok(datetime) = chrono::NaiveDateTime::parse_from_str(&value, format) {
            return Some(datetime.date());
        }
    }
    stats.coerced += 1;
    None
}

/// PaidDate carries a year-9999 "never paid" sentinel. Strip it here so the
/// engine only ever sees `None` for open invoices.
fn parse_paid_date(value: Option<&str>, stats: &mut LoadStats) -> Option<NaiveDate> {
    let raw = non_empty(value)?;
    if raw.contains("9999") {
        return None;
    }
    parse_date(Some(&raw), stats).filter(|d| d.year() < 9999)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn invoices_strip_unpaid_sentinel() {
        let dir = tempdir().unwrap();
        let path = write(
            &dir,
            "invoices.csv",
            "InvoiceID,CustID,InvoiceDate,PaidDate,SalesOrderID\n\
             1,10,2017-06-01,2017-07-01,100\n\
             2,20,2017-06-15,9999-12-31,200\n",
        );
        let (records, stats) = load_invoices(&path).unwrap();

        assert_eq!(stats.rows, 2);
        assert_eq!(stats.coerced, 0);
        assert!(records[0].paid_date.is_some());
        assert!(records[0].is_paid());
        assert!(records[1].paid_date.is_none());
        assert!(!records[1].is_paid());
    }

    #[test]
    fn unparseable_values_coerce_to_none_and_count() {
        let dir = tempdir().unwrap();
        let path = write(
            &dir,
            "invoices.csv",
            "InvoiceID,CustID,InvoiceDate,PaidDate,SalesOrderID\n\
             1,not-a-number,junk,,100\n\
             garbage,10,2017-06-01,,200\n",
        );
        let (records, stats) = load_invoices(&path).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(stats.rows, 1);
        assert_eq!(stats.skipped, 1); // unparseable InvoiceID
        assert_eq!(stats.coerced, 3); // CustID, InvoiceDate, and the bad key
        assert!(records[0].cust_id.is_none());
        assert!(records[0].invoice_date.is_none());
    }

    #[test]
    fn orders_parse_dollar_amounts_and_excel_ids() {
        let dir = tempdir().unwrap();
        let path = write(
            &dir,
            "orders.csv",
            "SalesOrderID,CustID,SubTotal,TotalDue,InvoiceID,CredApr\n\
             100.0,10,\"$1,250.50\",1300.00,1,APR\n\
             101,20,85.25,90.00,2,\n",
        );
        let (records, stats) = load_orders(&path).unwrap();

        assert_eq!(stats.rows, 2);
        assert_eq!(records[0].sales_order_id, 100);
        assert_eq!(records[0].sub_total, Some(1250.50));
        assert_eq!(records[0].credit_approval.as_deref(), Some("APR"));
        assert!(records[1].credit_approval.is_none());
    }

    #[test]
    fn datetime_exports_parse_as_dates() {
        let dir = tempdir().unwrap();
        let path = write(
            &dir,
            "shipments.csv",
            "ShipID,SalesOrderID,ShipDate\n1,100,2017-06-20 00:00:00\n",
        );
        let (records, _) = load_shipments(&path).unwrap();
        assert_eq!(
            records[0].ship_date,
            NaiveDate::from_ymd_opt(2017, 6, 20)
        );
    }

    #[test]
    fn missing_key_column_is_an_error() {
        let dir = tempdir().unwrap();
        let path = write(&dir, "customers.csv", "Name,Limit\nAcme,100\n");
        let err = load_customers(&path).unwrap_err();
        assert!(matches!(err, IoError::MissingColumn { ref column, .. } if column == "CustID"));
    }

    #[test]
    fn non_csv_extension_rejected() {
        let dir = tempdir().unwrap();
        let path = write(&dir, "data.xlsx", "not actually a spreadsheet");
        let err = load_client_aging(&path).unwrap_err();
        assert!(matches!(err, IoError::UnsupportedFormat(_)));
        assert!(err.to_string().contains("expected .csv"));
    }

    #[test]
    fn client_aging_keeps_raw_headers() {
        let dir = tempdir().unwrap();
        let path = write(
            &dir,
            "client_aging.csv",
            "Customer ID,Over 90,Balance\n42,\"$1,250.00\",1550\n",
        );
        let rows = load_client_aging(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Customer ID"], "42");
        assert_eq!(rows[0]["Over 90"], "$1,250.00");
    }

    #[test]
    fn semicolon_delimited_export_loads() {
        let dir = tempdir().unwrap();
        let path = write(
            &dir,
            "territory.csv",
            "TerritoryID;TerritoryName\n7;Pacific\n8;Mountain\n",
        );
        let (records, stats) = load_territories(&path).unwrap();
        assert_eq!(stats.rows, 2);
        assert_eq!(records[0].territory_name.as_deref(), Some("Pacific"));
    }

    #[test]
    fn full_dataset_loads_from_config_names() {
        let dir = tempdir().unwrap();
        write(
            &dir,
            "customer_invoices.csv",
            "InvoiceID,CustID,InvoiceDate,PaidDate,SalesOrderID\n1,10,2017-06-01,9999-12-31,100\n",
        );
        write(
            &dir,
            "sales_orders.csv",
            "SalesOrderID,CustID,SubTotal,TotalDue,ShipID,InvoiceID,OrderDate,TerritoryID,ProdID,CredApr\n100,10,500,510,5,1,2017-05-28,7,70,APR\n",
        );
        write(&dir, "shipments.csv", "ShipID,SalesOrderID,ShipDate\n5,100,2017-06-03\n");
        write(&dir, "customer_master.csv", "CustID,CustName,TerritoryID,CredLimit\n10,Acme,7,5000\n");
        write(&dir, "products.csv", "ProdID,ProdName\n70,Widget\n");
        write(&dir, "sales_territory.csv", "TerritoryID,TerritoryName\n7,Pacific\n");

        let config = DataConfig {
            dir: dir.path().display().to_string(),
            ..DataConfig::default()
        };
        let dataset = load_dataset(&config).unwrap();

        assert_eq!(dataset.invoices.len(), 1);
        assert_eq!(dataset.orders.len(), 1);
        assert_eq!(dataset.shipments.len(), 1);
        assert_eq!(dataset.customers[0].credit_limit, Some(5000.0));
        assert_eq!(dataset.territories[0].territory_name.as_deref(), Some("Pacific"));
    }
}
