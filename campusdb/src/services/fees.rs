use super::{default_field, filter_record, within};
use crate::backend::Record;
use crate::error::Result;
use crate::schema::{FEE_MASTER, RECEIPTS, TRANSACTIONS};
use crate::store::{Store, Tx};
use crate::util::{
    cell_number, cell_timestamp, field_text, is_blank, is_truthy, loose_eq, parse_bound,
    parse_timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeStructureFilter {
    pub programme_id: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentFilter {
    pub student_id: Option<String>,
    pub payment_status: Option<String>,
    pub payment_mode: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptFilter {
    pub txn_id: Option<String>,
    pub issued_by: Option<String>,
}

/// A recorded transaction and, when requested, its receipt.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub transaction: Record,
    pub receipt: Option<Record>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StudentFeeSummary {
    pub student_id: String,
    pub total_paid: f64,
    pub total_pending: f64,
    pub payments: Vec<Record>,
    pub last_payment_date: Option<String>,
    pub payment_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeeStats {
    pub total_collected: f64,
    pub total_transactions: usize,
    pub by_payment_mode: BTreeMap<String, f64>,
    /// Keyed by `YYYY-MM`.
    pub monthly_collection: BTreeMap<String, f64>,
}

/// Fee structures, payments and receipts.
pub struct Fees<'a> {
    store: &'a Store,
}

impl Store {
    pub fn fees(&self) -> Fees<'_> {
        Fees { store: self }
    }
}

impl<'a> Fees<'a> {
    /// Fee structures in effect right now.
    pub fn fee_structures(&self, filter: &FeeStructureFilter) -> Result<Vec<Record>> {
        let filters = filter_record(&[
            ("programme_id", &filter.programme_id),
            ("category", &filter.category),
        ]);
        self.store.read(|tx| effective_fees(tx, &filters))
    }

    pub fn create_fee_structure(&self, data: &Record) -> Result<Record> {
        self.store.transaction(|tx| {
            let mut data = data.clone();
            if is_blank(data.get("programme_id")) {
                if let Some(course) = data.remove("course") {
                    data.insert("programme_id".into(), course);
                }
            }
            default_field(
                &mut data,
                "currency",
                json!(tx.config().fees.default_currency),
            );
            tx.create_entity(FEE_MASTER, data)
        })
    }

    pub fn update_fee_structure(&self, fee_id: &str, patch: &Record) -> Result<Record> {
        self.store
            .transaction(|tx| tx.update_entity(FEE_MASTER, fee_id, patch))
    }

    pub fn delete_fee_structure(&self, fee_id: &str) -> Result<()> {
        self.store
            .transaction(|tx| tx.delete_entity(FEE_MASTER, fee_id))
    }

    /// Record a completed payment. A truthy `generate_receipt` also issues a
    /// receipt and links it back to the transaction.
    pub fn create_payment(&self, data: &Record) -> Result<Payment> {
        self.store.transaction(|tx| {
            let mut txn = data.clone();
            let generate_receipt = is_truthy(txn.remove("generate_receipt").as_ref());
            let receipt_file = txn.remove("receipt_file_id");
            txn.insert("payment_status".into(), json!("completed"));
            txn.remove("txn_id");
            default_field(
                &mut txn,
                "currency",
                json!(tx.config().fees.default_currency),
            );

            let transaction = tx.create_entity(TRANSACTIONS, txn)?;
            let txn_id = field_text(&transaction, "txn_id");
            if !generate_receipt {
                return Ok(Payment { transaction, receipt: None });
            }

            let mut receipt = Record::new();
            receipt.insert("txn_id".into(), json!(txn_id));
            receipt.insert("issued_by".into(), json!(field_text(&transaction, "created_by")));
            receipt.insert("issued_on".into(), json!(field_text(&transaction, "date")));
            receipt.insert(
                "pdf_drive_file_id".into(),
                receipt_file.unwrap_or(json!("")),
            );
            receipt.insert("email_sent".into(), json!(false));
            let receipt = tx.create_entity(RECEIPTS, receipt)?;

            let stored = tx.require_entity(TRANSACTIONS, &txn_id)?;
            let mut patch = Record::new();
            patch.insert("receipt_id".into(), json!(field_text(&receipt, "receipt_id")));
            tx.set_cells(TRANSACTIONS, stored.row, &patch)?;
            let transaction = tx.get_entity(TRANSACTIONS, &txn_id)?;

            Ok(Payment {
                transaction,
                receipt: Some(receipt),
            })
        })
    }

    pub fn payments(&self, filter: &PaymentFilter) -> Result<Vec<Record>> {
        self.store.read(|tx| payments(tx, filter))
    }

    pub fn receipts(&self, filter: &ReceiptFilter) -> Result<Vec<Record>> {
        let filters = filter_record(&[("txn_id", &filter.txn_id), ("issued_by", &filter.issued_by)]);
        self.store.read(|tx| tx.list_entities(RECEIPTS, &filters))
    }

    /// All transactions of one student.
    pub fn student_fees(&self, student_id: &str) -> Result<Vec<Record>> {
        self.store.read(|tx| student_transactions(tx, student_id))
    }

    /// Paid versus owed for one student. Pending is the sum of fee structures
    /// currently in effect minus everything paid, never below zero.
    pub fn student_fee_summary(&self, student_id: &str) -> Result<StudentFeeSummary> {
        self.store.read(|tx| student_fee_summary(tx, student_id))
    }

    pub fn stats(&self) -> Result<FeeStats> {
        self.store.read(fee_stats)
    }
}

pub(crate) fn student_fee_summary(tx: &Tx<'_>, student_id: &str) -> Result<StudentFeeSummary> {
    let payments = student_transactions(tx, student_id)?;
    let total_paid: f64 = payments
        .iter()
        .map(|p| cell_number(p.get("amount")).unwrap_or(0.0))
        .sum();
    let last_payment_date = payments
        .iter()
        .filter_map(|p| {
            let date = field_text(p, "date");
            parse_timestamp(&date).map(|ts| (ts, date))
        })
        .max_by_key(|(ts, _)| *ts)
        .map(|(_, date)| date);

    let total_required: f64 = effective_fees(tx, &Record::new())?
        .iter()
        .map(|f| cell_number(f.get("amount")).unwrap_or(0.0))
        .sum();

    Ok(StudentFeeSummary {
        student_id: student_id.to_string(),
        total_paid,
        total_pending: (total_required - total_paid).max(0.0),
        payment_count: payments.len(),
        last_payment_date,
        payments,
    })
}

fn effective_fees(tx: &Tx<'_>, filters: &Record) -> Result<Vec<Record>> {
    let now = Utc::now();
    Ok(tx
        .list_entities(FEE_MASTER, filters)?
        .into_iter()
        .filter(|fee| {
            let from = cell_timestamp(fee.get("effective_from"));
            let to = cell_timestamp(fee.get("effective_to"));
            from.map_or(true, |f| now >= f) && to.map_or(true, |t| now <= t)
        })
        .collect())
}

fn student_transactions(tx: &Tx<'_>, student_id: &str) -> Result<Vec<Record>> {
    Ok(tx
        .records(TRANSACTIONS)?
        .into_iter()
        .filter(|t| t.get("student_id").map_or(false, |s| loose_eq(s, &json!(student_id))))
        .collect())
}

fn payments(tx: &Tx<'_>, filter: &PaymentFilter) -> Result<Vec<Record>> {
    let start = parse_bound("start_date", filter.start_date.as_deref())?;
    let end = parse_bound("end_date", filter.end_date.as_deref())?;
    let filters = filter_record(&[
        ("student_id", &filter.student_id),
        ("payment_status", &filter.payment_status),
        ("payment_mode", &filter.payment_mode),
    ]);
    Ok(tx
        .list_entities(TRANSACTIONS, &filters)?
        .into_iter()
        .filter(|p| within(p.get("date"), start, end))
        .collect())
}

pub(crate) fn fee_stats(tx: &Tx<'_>) -> Result<FeeStats> {
    let payments = payments(tx, &PaymentFilter::default())?;
    let mut stats = FeeStats {
        total_transactions: payments.len(),
        ..FeeStats::default()
    };
    for payment in &payments {
        let amount = cell_number(payment.get("amount")).unwrap_or(0.0);
        stats.total_collected += amount;

        let mode = field_text(payment, "payment_mode");
        let mode = if mode.is_empty() { "unknown".to_string() } else { mode };
        *stats.by_payment_mode.entry(mode).or_insert(0.0) += amount;

        let month = cell_timestamp(payment.get("date"))
            .map(|ts| ts.format("%Y-%m").to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        *stats.monthly_collection.entry(month).or_insert(0.0) += amount;
    }
    Ok(stats)
}
