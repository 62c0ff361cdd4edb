//! Stream registry — the fixed set of QuickBooks entity descriptors.
//!
//! Every entity shares identical sync behavior; descriptors only carry the
//! entity name, keys, and page size. The sync engine is parameterized by a
//! descriptor value, so no per-entity code exists.

use crate::error::SyncError;

/// Replication key shared by every incremental QuickBooks entity.
pub const REPLICATION_KEY: &str = "MetaData.LastUpdatedTime";

/// Immutable description of one entity stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Entity name, PascalCase as the query language expects (`Invoice`).
    pub name: &'static str,
    pub primary_key: &'static str,
    /// `None` marks a full-table stream with no incremental bookmark.
    pub replication_key: Option<&'static str>,
    pub page_size: usize,
}

const fn incremental(name: &'static str, page_size: usize) -> StreamDescriptor {
    StreamDescriptor {
        name,
        primary_key: "Id",
        replication_key: Some(REPLICATION_KEY),
        page_size,
    }
}

const fn full_table(name: &'static str, page_size: usize) -> StreamDescriptor {
    StreamDescriptor {
        name,
        primary_key: "Id",
        replication_key: None,
        page_size,
    }
}

/// Returns descriptors for every supported entity.
pub fn all_streams(page_size: usize) -> Vec<StreamDescriptor> {
    vec![
        incremental("Account", page_size),
        incremental("Bill", page_size),
        incremental("BillPayment", page_size),
        incremental("Budget", page_size),
        incremental("Class", page_size),
        incremental("CompanyCurrency", page_size),
        full_table("CompanyInfo", page_size),
        incremental("CreditMemo", page_size),
        incremental("Customer", page_size),
        incremental("CustomerType", page_size),
        incremental("Department", page_size),
        incremental("Employee", page_size),
        incremental("Estimate", page_size),
        incremental("Invoice", page_size),
        incremental("Item", page_size),
        incremental("JournalEntry", page_size),
        incremental("Payment", page_size),
        incremental("PaymentMethod", page_size),
        full_table("Preferences", page_size),
        incremental("Purchase", page_size),
        incremental("PurchaseOrder", page_size),
        incremental("SalesReceipt", page_size),
        full_table("TaxCode", page_size),
        full_table("TaxRate", page_size),
        incremental("Term", page_size),
        incremental("TimeActivity", page_size),
        incremental("Transfer", page_size),
        incremental("Vendor", page_size),
        incremental("VendorCredit", page_size),
    ]
}

/// Returns the streams selected for this run.
///
/// With no filter, every stream is selected. Filter names must match
/// registered streams exactly; an unknown name is a config error rather
/// than a silently empty sync.
pub fn selected_streams(
    page_size: usize,
    filter: Option<&[String]>,
) -> Result<Vec<StreamDescriptor>, SyncError> {
    let all = all_streams(page_size);
    let Some(names) = filter else {
        return Ok(all);
    };

    for name in names {
        if !all.iter().any(|s| s.name == name.as_str()) {
            return Err(SyncError::Config(format!("unknown stream '{}'", name)));
        }
    }
    Ok(all
        .into_iter()
        .filter(|s| names.iter().any(|n| n == s.name))
        .collect())
}
