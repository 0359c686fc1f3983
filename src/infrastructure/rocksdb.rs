use crate::domain::appointment::AppointmentId;
use crate::domain::payment::{NewPayment, PaymentId, PaymentRecord, PaymentStatus};
use crate::domain::ports::{PaymentLedger, SwapOutcome};
use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for payment records, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping an appointment to its non-terminal payment.
pub const CF_APPOINTMENT_INDEX: &str = "appointment_index";
/// Column Family for ledger bookkeeping (id sequence).
pub const CF_META: &str = "meta";

const LAST_ID_KEY: &[u8] = b"last_payment_id";

/// A persistent payment ledger backed by RocksDB.
///
/// Records are stored as JSON. Writers are serialized through an async mutex
/// and each mutation is committed as a single `WriteBatch`, so the status
/// check and the write of a compare-and-swap are one atomic step.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbLedger {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

impl RocksDbLedger {
    /// Opens or creates a RocksDB instance at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_PAYMENTS, CF_APPOINTMENT_INDEX, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EscrowError::storage(format!("{name} column family not found")))
    }

    fn read_record(&self, payment_id: PaymentId) -> Result<Option<PaymentRecord>> {
        let cf = self.cf(CF_PAYMENTS)?;
        match self.db.get_cf(cf, payment_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn active_id(&self, appointment_id: AppointmentId) -> Result<Option<PaymentId>> {
        let cf = self.cf(CF_APPOINTMENT_INDEX)?;
        match self.db.get_cf(cf, appointment_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode_id(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| EscrowError::storage("corrupt id encoding"))?;
    Ok(u64::from_be_bytes(raw))
}

#[async_trait]
impl PaymentLedger for RocksDbLedger {
    async fn create(&self, new: NewPayment) -> Result<PaymentRecord> {
        let _guard = self.writer.lock().await;

        if let Some(existing) = self.active_id(new.appointment_id)? {
            return Err(EscrowError::DuplicateIntent {
                appointment_id: new.appointment_id,
                payment_id: existing,
            });
        }

        let meta = self.cf(CF_META)?;
        let last_id = match self.db.get_cf(meta, LAST_ID_KEY)? {
            Some(bytes) => decode_id(&bytes)?,
            None => 0,
        };
        let record = PaymentRecord::pending(last_id + 1, new);

        let mut batch = WriteBatch::default();
        batch.put_cf(meta, LAST_ID_KEY, record.payment_id.to_be_bytes());
        batch.put_cf(
            self.cf(CF_APPOINTMENT_INDEX)?,
            record.appointment_id.to_be_bytes(),
            record.payment_id.to_be_bytes(),
        );
        batch.put_cf(
            self.cf(CF_PAYMENTS)?,
            record.payment_id.to_be_bytes(),
            serde_json::to_vec(&record)?,
        );
        self.db.write(batch)?;

        Ok(record)
    }

    async fn get(&self, payment_id: PaymentId) -> Result<Option<PaymentRecord>> {
        self.read_record(payment_id)
    }

    async fn find_active(&self, appointment_id: AppointmentId) -> Result<Option<PaymentRecord>> {
        match self.active_id(appointment_id)? {
            Some(payment_id) => self.read_record(payment_id),
            None => Ok(None),
        }
    }

    async fn compare_and_swap(
        &self,
        expected: PaymentStatus,
        updated: PaymentRecord,
    ) -> Result<SwapOutcome> {
        let _guard = self.writer.lock().await;

        let current = self
            .read_record(updated.payment_id)?
            .ok_or(EscrowError::PaymentNotFound(updated.payment_id))?;
        if current.status() != expected {
            return Ok(SwapOutcome::Conflict(current));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_PAYMENTS)?,
            updated.payment_id.to_be_bytes(),
            serde_json::to_vec(&updated)?,
        );
        if updated.status().is_terminal() {
            batch.delete_cf(
                self.cf(CF_APPOINTMENT_INDEX)?,
                updated.appointment_id.to_be_bytes(),
            );
        }
        self.db.write(batch)?;

        Ok(SwapOutcome::Swapped(updated))
    }

    async fn due_for_release(&self, now: DateTime<Utc>) -> Result<Vec<PaymentRecord>> {
        let index = self.cf(CF_APPOINTMENT_INDEX)?;
        let mut due = Vec::new();

        // Only non-terminal records are indexed, so this never scans the
        // audit trail.
        for item in self.db.iterator_cf(index, IteratorMode::Start) {
            let (_appointment, payment_id) = item?;
            if let Some(record) = self.read_record(decode_id(&payment_id)?)?
                && record.is_due(now)
            {
                due.push(record);
            }
        }

        due.sort_by_key(|record| (record.auto_release_deadline, record.payment_id));
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fee::FeeBreakdown;
    use crate::domain::instrument::PaymentMethod;
    use crate::domain::payment::{HoldReceipt, Initiator};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn new_payment(appointment_id: AppointmentId) -> NewPayment {
        let scheduled_at = Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap();
        NewPayment {
            appointment_id,
            fee: FeeBreakdown {
                base_price: dec!(100.00),
                platform_fee: dec!(20.00),
                total_amount: dec!(120.00),
            },
            installments: 1,
            client_token: "pi_secret".into(),
            scheduled_at,
            is_mock: true,
            created_at: scheduled_at,
        }
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let ledger = RocksDbLedger::open(dir.path()).expect("Failed to open RocksDB");

        assert!(ledger.db.cf_handle(CF_PAYMENTS).is_some());
        assert!(ledger.db.cf_handle(CF_APPOINTMENT_INDEX).is_some());
        assert!(ledger.db.cf_handle(CF_META).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_lifecycle_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let ledger = RocksDbLedger::open(dir.path()).unwrap();
            let mut record = ledger.create(new_payment(5)).await.unwrap();
            assert_eq!(record.payment_id, 1);
            assert!(matches!(
                ledger.create(new_payment(5)).await,
                Err(EscrowError::DuplicateIntent { .. })
            ));

            record
                .hold(
                    PaymentMethod::Pix,
                    1,
                    HoldReceipt {
                        instrument_token: "pix".into(),
                        hold_reference: "hold".into(),
                        payment_reference: "pay".into(),
                    },
                    record.scheduled_at,
                    Duration::hours(6),
                )
                .unwrap();
            ledger
                .compare_and_swap(PaymentStatus::Pending, record)
                .await
                .unwrap();
        }

        let ledger = RocksDbLedger::open(dir.path()).unwrap();
        let record = ledger.find_active(5).await.unwrap().unwrap();
        assert_eq!(record.status(), PaymentStatus::PaidHeld);

        let deadline = record.auto_release_deadline.unwrap();
        assert_eq!(ledger.due_for_release(deadline).await.unwrap().len(), 1);

        let mut released = record.clone();
        released
            .release(Initiator::SystemAuto, "trans".into(), deadline)
            .unwrap();
        ledger
            .compare_and_swap(PaymentStatus::PaidHeld, released)
            .await
            .unwrap();

        // A stale writer loses.
        let mut refunded = record;
        refunded
            .refund(Initiator::Patient, "late".into(), "refund".into(), deadline)
            .unwrap();
        let outcome = ledger
            .compare_and_swap(PaymentStatus::PaidHeld, refunded)
            .await
            .unwrap();
        assert!(matches!(outcome, SwapOutcome::Conflict(current) if current.status() == PaymentStatus::Released));

        assert!(ledger.find_active(5).await.unwrap().is_none());
        assert_eq!(ledger.create(new_payment(5)).await.unwrap().payment_id, 2);
    }
}
