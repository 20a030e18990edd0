use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fieldwork_core::{AggregateRoot, DomainError, DomainResult, ExpectedVersion, ResourceId};

use crate::reservation::TaskResourceReservation;

/// Availability status exposed for a resource.
///
/// `Disponible`/`EnUtilisation` are derived from quantities; the other two come
/// from the externally-set [`ResourceCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Disponible,
    EnUtilisation,
    EnMaintenance,
    Indisponible,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Disponible => "DISPONIBLE",
            ResourceStatus::EnUtilisation => "EN_UTILISATION",
            ResourceStatus::EnMaintenance => "EN_MAINTENANCE",
            ResourceStatus::Indisponible => "INDISPONIBLE",
        }
    }
}

impl core::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally-controlled part of a resource's status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCondition {
    #[default]
    Operational,
    Maintenance,
    Unavailable,
}

impl ResourceCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCondition::Operational => "operational",
            ResourceCondition::Maintenance => "maintenance",
            ResourceCondition::Unavailable => "unavailable",
        }
    }
}

impl core::str::FromStr for ResourceCondition {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operational" => Ok(ResourceCondition::Operational),
            "maintenance" => Ok(ResourceCondition::Maintenance),
            "unavailable" => Ok(ResourceCondition::Unavailable),
            other => Err(DomainError::validation(format!(
                "unknown resource condition '{other}'"
            ))),
        }
    }
}

/// Input for registering a resource in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    pub name: String,
    pub resource_type: String,
    pub unit: String,
    pub quantity_total: i64,
}

/// A single line of a batch reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub resource_id: ResourceId,
    pub quantity: i64,
}

/// Flat, serializable view of a resource record (rows and API responses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub name: String,
    pub resource_type: String,
    pub unit: String,
    pub status: ResourceStatus,
    pub condition: ResourceCondition,
    pub quantity_total: i64,
    pub quantity_available: i64,
    pub quantity_reserved: i64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate root: ResourceRecord.
///
/// Holds `quantity_available + quantity_reserved == quantity_total` after every
/// successful mutation. Failed mutations leave the record untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    id: ResourceId,
    name: String,
    resource_type: String,
    unit: String,
    condition: ResourceCondition,
    quantity_total: i64,
    quantity_available: i64,
    quantity_reserved: i64,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn register(id: ResourceId, new: NewResource, now: DateTime<Utc>) -> DomainResult<Self> {
        if new.name.trim().is_empty() {
            return Err(DomainError::validation("resource name cannot be empty"));
        }
        if new.quantity_total < 0 {
            return Err(DomainError::validation("quantity_total cannot be negative"));
        }

        Ok(Self {
            id,
            name: new.name.trim().to_string(),
            resource_type: new.resource_type,
            unit: new.unit,
            condition: ResourceCondition::Operational,
            quantity_total: new.quantity_total,
            quantity_available: new.quantity_total,
            quantity_reserved: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuild a record from stored state, refusing rows that break the balance.
    ///
    /// The stored `status` is ignored: it is always recomputed.
    pub fn restore(snapshot: ResourceSnapshot) -> DomainResult<Self> {
        let record = Self {
            id: snapshot.id,
            name: snapshot.name,
            resource_type: snapshot.resource_type,
            unit: snapshot.unit,
            condition: snapshot.condition,
            quantity_total: snapshot.quantity_total,
            quantity_available: snapshot.quantity_available,
            quantity_reserved: snapshot.quantity_reserved,
            version: snapshot.version,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        };
        record.check_balance()?;
        Ok(record)
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            id: self.id,
            name: self.name.clone(),
            resource_type: self.resource_type.clone(),
            unit: self.unit.clone(),
            status: self.status(),
            condition: self.condition,
            quantity_total: self.quantity_total,
            quantity_available: self.quantity_available,
            quantity_reserved: self.quantity_reserved,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn id_typed(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn condition(&self) -> ResourceCondition {
        self.condition
    }

    pub fn quantity_total(&self) -> i64 {
        self.quantity_total
    }

    pub fn quantity_available(&self) -> i64 {
        self.quantity_available
    }

    pub fn quantity_reserved(&self) -> i64 {
        self.quantity_reserved
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Current status, always derived from condition + quantities.
    pub fn status(&self) -> ResourceStatus {
        match self.condition {
            ResourceCondition::Maintenance => ResourceStatus::EnMaintenance,
            ResourceCondition::Unavailable => ResourceStatus::Indisponible,
            ResourceCondition::Operational if self.quantity_available == 0 => {
                ResourceStatus::EnUtilisation
            }
            ResourceCondition::Operational => ResourceStatus::Disponible,
        }
    }

    pub fn check_balance(&self) -> DomainResult<()> {
        if self.quantity_available < 0 || self.quantity_reserved < 0 {
            return Err(DomainError::invariant(format!(
                "resource {} has negative quantities (available={}, reserved={})",
                self.id, self.quantity_available, self.quantity_reserved
            )));
        }
        if self.quantity_available + self.quantity_reserved != self.quantity_total {
            return Err(DomainError::invariant(format!(
                "resource {} is unbalanced: available {} + reserved {} != total {}",
                self.id, self.quantity_available, self.quantity_reserved, self.quantity_total
            )));
        }
        Ok(())
    }

    /// Move `quantity` from available to reserved.
    pub fn reserve(&mut self, quantity: i64, now: DateTime<Utc>) -> DomainResult<()> {
        ensure_positive(quantity)?;
        if quantity > self.quantity_available {
            return Err(DomainError::InsufficientStock {
                resource_id: self.id,
                requested: quantity,
                available: self.quantity_available,
            });
        }

        self.quantity_available -= quantity;
        self.quantity_reserved += quantity;
        self.touch(now);
        Ok(())
    }

    /// Move `quantity` from reserved back to available.
    ///
    /// Releasing more than is reserved is a caller bug; the record is left as is.
    pub fn release(&mut self, quantity: i64, now: DateTime<Utc>) -> DomainResult<()> {
        ensure_positive(quantity)?;
        if quantity > self.quantity_reserved {
            return Err(DomainError::invariant(format!(
                "release of {quantity} on resource {} exceeds reserved quantity {}",
                self.id, self.quantity_reserved
            )));
        }

        self.quantity_reserved -= quantity;
        self.quantity_available += quantity;
        self.touch(now);
        Ok(())
    }

    /// Restock (positive delta) or write off (negative delta) available stock.
    pub fn adjust_total(&mut self, delta: i64, now: DateTime<Utc>) -> DomainResult<()> {
        if delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }
        let (Some(new_available), Some(new_total)) = (
            self.quantity_available.checked_add(delta),
            self.quantity_total.checked_add(delta),
        ) else {
            return Err(DomainError::validation(format!(
                "adjusting resource {} by {delta} overflows its quantities",
                self.id
            )));
        };
        if new_available < 0 || new_total < 0 {
            return Err(DomainError::validation(format!(
                "cannot remove {} units: only {} available ({} reserved)",
                delta.unsigned_abs(),
                self.quantity_available,
                self.quantity_reserved
            )));
        }

        self.quantity_available = new_available;
        self.quantity_total = new_total;
        self.touch(now);
        Ok(())
    }

    pub fn set_condition(&mut self, condition: ResourceCondition, now: DateTime<Utc>) {
        if self.condition != condition {
            self.condition = condition;
            self.touch(now);
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}

impl AggregateRoot for ResourceRecord {
    type Id = ResourceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn ensure_positive(quantity: i64) -> DomainResult<()> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    Ok(())
}

/// Working set of resource records locked by one unit of work.
///
/// Remembers the version each record was loaded at, so the store can save only
/// the touched records with an optimistic check.
#[derive(Debug, Clone, Default)]
pub struct LedgerBatch {
    records: BTreeMap<ResourceId, ResourceRecord>,
    loaded_versions: BTreeMap<ResourceId, u64>,
}

impl LedgerBatch {
    pub fn new(records: impl IntoIterator<Item = ResourceRecord>) -> Self {
        let records: BTreeMap<_, _> = records.into_iter().map(|r| (r.id, r)).collect();
        let loaded_versions = records.iter().map(|(id, r)| (*id, r.version)).collect();
        Self {
            records,
            loaded_versions,
        }
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.records.contains_key(id)
    }

    /// Reserve every request, in order, or none of them.
    ///
    /// On the first failure every record touched by this call is put back exactly
    /// as it was loaded and the original error (naming the failing resource) is
    /// returned.
    pub fn reserve_all(
        &mut self,
        requests: &[ReservationRequest],
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut previous: BTreeMap<ResourceId, ResourceRecord> = BTreeMap::new();

        for request in requests {
            let outcome = match self.records.get_mut(&request.resource_id) {
                Some(record) => {
                    let before = record.clone();
                    let outcome = record.reserve(request.quantity, now);
                    if outcome.is_ok() {
                        previous.entry(request.resource_id).or_insert(before);
                    }
                    outcome
                }
                None => Err(DomainError::not_found(format!(
                    "resource {}",
                    request.resource_id
                ))),
            };

            if let Err(err) = outcome {
                tracing::debug!(
                    resource_id = %request.resource_id,
                    rolled_back = previous.len(),
                    "batch reservation failed; rolling back"
                );
                self.records.extend(previous);
                return Err(err);
            }
        }

        Ok(())
    }

    /// Release every outstanding reservation and mark it released.
    ///
    /// Reservations that were already released are skipped, so calling this twice
    /// never credits the ledger twice. Returns how many reservations were released.
    pub fn release_all(
        &mut self,
        reservations: &mut [TaskResourceReservation],
        now: DateTime<Utc>,
    ) -> DomainResult<usize> {
        let mut released = 0;
        for reservation in reservations.iter_mut().filter(|r| r.is_outstanding()) {
            let record = self.records.get_mut(&reservation.resource_id).ok_or_else(|| {
                DomainError::invariant(format!(
                    "outstanding reservation references resource {} which is not loaded",
                    reservation.resource_id
                ))
            })?;
            record.release(reservation.quantity_required, now)?;
            reservation.mark_released(now);
            released += 1;
        }
        Ok(released)
    }

    /// Records changed by this batch, with the version they were loaded at.
    pub fn into_touched(self) -> Vec<(ResourceRecord, ExpectedVersion)> {
        let loaded = self.loaded_versions;
        self.records
            .into_values()
            .filter_map(|record| {
                let original = loaded.get(&record.id).copied()?;
                (record.version != original).then_some((record, ExpectedVersion::Exact(original)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn resource(total: i64) -> ResourceRecord {
        ResourceRecord::register(
            ResourceId::new(),
            NewResource {
                name: "Tracteur".to_string(),
                resource_type: "machine".to_string(),
                unit: "h".to_string(),
                quantity_total: total,
            },
            test_time(),
        )
        .unwrap()
    }

    #[test]
    fn register_starts_fully_available() {
        let r = resource(100);
        assert_eq!(r.quantity_available(), 100);
        assert_eq!(r.quantity_reserved(), 0);
        assert_eq!(r.status(), ResourceStatus::Disponible);
        r.check_balance().unwrap();
    }

    #[test]
    fn register_rejects_blank_name_and_negative_total() {
        let bad_name = NewResource {
            name: "  ".to_string(),
            resource_type: "input".to_string(),
            unit: "kg".to_string(),
            quantity_total: 10,
        };
        assert!(matches!(
            ResourceRecord::register(ResourceId::new(), bad_name, test_time()),
            Err(DomainError::Validation(_))
        ));

        let bad_total = NewResource {
            name: "Engrais".to_string(),
            resource_type: "input".to_string(),
            unit: "kg".to_string(),
            quantity_total: -1,
        };
        assert!(matches!(
            ResourceRecord::register(ResourceId::new(), bad_total, test_time()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn reserve_moves_quantity_and_fails_without_partial_decrement() {
        let mut r = resource(100);
        r.reserve(40, test_time()).unwrap();
        assert_eq!((r.quantity_available(), r.quantity_reserved()), (60, 40));

        let before = r.clone();
        let err = r.reserve(70, test_time()).unwrap_err();
        match err {
            DomainError::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 70);
                assert_eq!(available, 60);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(r, before);
    }

    #[test]
    fn status_tracks_zero_availability() {
        let mut r = resource(10);
        r.reserve(10, test_time()).unwrap();
        assert_eq!(r.status(), ResourceStatus::EnUtilisation);

        r.release(4, test_time()).unwrap();
        assert_eq!(r.status(), ResourceStatus::Disponible);
    }

    #[test]
    fn condition_overrides_derived_status() {
        let mut r = resource(10);
        r.set_condition(ResourceCondition::Maintenance, test_time());
        assert_eq!(r.status(), ResourceStatus::EnMaintenance);

        r.reserve(10, test_time()).unwrap();
        assert_eq!(r.status(), ResourceStatus::EnMaintenance);

        r.set_condition(ResourceCondition::Operational, test_time());
        assert_eq!(r.status(), ResourceStatus::EnUtilisation);
    }

    #[test]
    fn over_release_is_an_invariant_violation_and_changes_nothing() {
        let mut r = resource(10);
        r.reserve(3, test_time()).unwrap();
        let before = r.clone();

        let err = r.release(4, test_time()).unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(r, before);
    }

    #[test]
    fn non_positive_quantities_are_rejected() {
        let mut r = resource(10);
        assert!(matches!(r.reserve(0, test_time()), Err(DomainError::Validation(_))));
        assert!(matches!(r.release(-2, test_time()), Err(DomainError::Validation(_))));
    }

    #[test]
    fn adjust_total_cannot_eat_into_reserved_stock() {
        let mut r = resource(10);
        r.reserve(8, test_time()).unwrap();

        assert!(matches!(r.adjust_total(-3, test_time()), Err(DomainError::Validation(_))));
        r.adjust_total(-2, test_time()).unwrap();
        assert_eq!(
            (r.quantity_total(), r.quantity_available(), r.quantity_reserved()),
            (8, 0, 8)
        );

        r.adjust_total(5, test_time()).unwrap();
        assert_eq!((r.quantity_total(), r.quantity_available()), (13, 5));
        r.check_balance().unwrap();
    }

    #[test]
    fn adjust_total_rejects_overflowing_deltas() {
        let mut r = resource(10);
        r.reserve(5, test_time()).unwrap();
        let before = r.clone();

        for delta in [i64::MAX, i64::MAX - 5, i64::MIN] {
            assert!(matches!(
                r.adjust_total(delta, test_time()),
                Err(DomainError::Validation(_))
            ));
            assert_eq!(r, before);
        }
        r.check_balance().unwrap();
        assert!(r.quantity_total() >= 0);
    }

    #[test]
    fn restore_rejects_unbalanced_rows() {
        let mut snapshot = resource(10).snapshot();
        snapshot.quantity_reserved = 3;
        assert!(ResourceRecord::restore(snapshot).unwrap_err().is_invariant_violation());
    }

    #[test]
    fn restore_recomputes_stale_status() {
        let mut snapshot = resource(10).snapshot();
        snapshot.status = ResourceStatus::EnUtilisation;
        let restored = ResourceRecord::restore(snapshot).unwrap();
        assert_eq!(restored.status(), ResourceStatus::Disponible);
    }

    #[test]
    fn reserve_all_is_all_or_nothing() {
        let a = resource(100);
        let b = resource(5);
        let (a_id, b_id) = (a.id_typed(), b.id_typed());
        let mut batch = LedgerBatch::new([a.clone(), b.clone()]);

        let err = batch
            .reserve_all(
                &[
                    ReservationRequest {
                        resource_id: a_id,
                        quantity: 40,
                    },
                    ReservationRequest {
                        resource_id: b_id,
                        quantity: 6,
                    },
                ],
                test_time(),
            )
            .unwrap_err();

        match err {
            DomainError::InsufficientStock { resource_id, .. } => assert_eq!(resource_id, b_id),
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(batch.get(&a_id), Some(&a));
        assert_eq!(batch.get(&b_id), Some(&b));
        assert!(batch.into_touched().is_empty());
    }

    #[test]
    fn release_all_is_idempotent() {
        let r = resource(100);
        let id = r.id_typed();
        let mut batch = LedgerBatch::new([r]);
        batch
            .reserve_all(
                &[ReservationRequest {
                    resource_id: id,
                    quantity: 40,
                }],
                test_time(),
            )
            .unwrap();

        let mut reservations = vec![
            TaskResourceReservation::new(fieldwork_core::TaskId::new(), id, 40, test_time())
                .unwrap(),
        ];

        assert_eq!(batch.release_all(&mut reservations, test_time()).unwrap(), 1);
        assert_eq!(batch.release_all(&mut reservations, test_time()).unwrap(), 0);

        let record = batch.get(&id).unwrap();
        assert_eq!((record.quantity_available(), record.quantity_reserved()), (100, 0));
        assert_eq!(record.status(), ResourceStatus::Disponible);
    }

    #[test]
    fn into_touched_reports_loaded_version() {
        let r = resource(10);
        let id = r.id_typed();
        let loaded = r.version();
        let mut batch = LedgerBatch::new([r, resource(3)]);
        batch
            .reserve_all(
                &[ReservationRequest {
                    resource_id: id,
                    quantity: 1,
                }],
                test_time(),
            )
            .unwrap();

        let touched = batch.into_touched();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].0.id_typed(), id);
        assert_eq!(touched[0].1, ExpectedVersion::Exact(loaded));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Reserve(i64),
            Release(i64),
            Adjust(i64),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (1i64..60).prop_map(Op::Reserve),
                (1i64..60).prop_map(Op::Release),
                (-30i64..30).prop_map(Op::Adjust),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: whatever sequence of ledger operations is attempted, the
            /// balance holds and the derived status matches availability.
            #[test]
            fn balance_and_status_hold_after_every_operation(
                total in 0i64..200,
                ops in prop::collection::vec(op(), 1..40)
            ) {
                let mut r = resource(total);
                for op in ops {
                    let before = r.clone();
                    let outcome = match op {
                        Op::Reserve(q) => r.reserve(q, test_time()),
                        Op::Release(q) => r.release(q, test_time()),
                        Op::Adjust(d) => r.adjust_total(d, test_time()),
                    };
                    if outcome.is_err() {
                        prop_assert_eq!(&r, &before);
                    }
                    prop_assert!(r.check_balance().is_ok());
                    let expected = if r.quantity_available() == 0 {
                        ResourceStatus::EnUtilisation
                    } else {
                        ResourceStatus::Disponible
                    };
                    prop_assert_eq!(r.status(), expected);
                }
            }
        }
    }
}
