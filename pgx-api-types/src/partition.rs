use serde::{Deserialize, Serialize};

/// Which column a [`PartitionPlan`] slices on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionKey {
    /// A single-column integer key (primary key, else unique key).
    Integer { column: String, nullable: bool },
    /// Physical row location, used when no suitable integer key exists.
    Ctid,
}

/// One non-overlapping slice of a table, handed to exactly one copy
/// worker. `min`/`max` are `-1` for the synthetic `ctid` sentinel values
/// ("NULL bucket", "open-ended last range").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRange {
    pub part_number: i32,
    pub part_count: i32,
    pub min: i64,
    pub max: i64,
    pub estimated_count: i64,
}

impl PartitionRange {
    /// `true` for the synthetic `(-1, -1)` NULL bucket of a nullable
    /// integer key.
    pub fn is_null_bucket(&self) -> bool {
        self.min == -1 && self.max == -1
    }

    /// `true` for the open-ended last range of a `ctid` plan, or the
    /// `>= min` last range of an integer-key plan.
    pub fn is_open_ended(&self) -> bool {
        self.max == -1 && !self.is_null_bucket()
    }
}

/// The full, ordered partitioning of a single table. An empty plan
/// means "no partitioning" — the table is copied whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub key: Option<PartitionKey>,
    pub ranges: Vec<PartitionRange>,
}

impl PartitionPlan {
    pub fn empty() -> Self {
        PartitionPlan {
            key: None,
            ranges: Vec::new(),
        }
    }

    pub fn part_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_partitioned(&self) -> bool {
        self.ranges.len() > 1
    }

    /// Validates that a partition plan's intervals are disjoint and
    /// together cover the full key domain (plus a NULL bucket when
    /// applicable). Only meaningful for
    /// integer-key plans: `ctid` plans are validated structurally by
    /// the planner since page numbers aren't independently knowable
    /// here.
    pub fn validate_integer_coverage(&self) -> Result<(), String> {
        let Some(PartitionKey::Integer { nullable, .. }) = &self.key else {
            return Ok(());
        };
        if self.ranges.is_empty() {
            return Ok(());
        }

        let mut data_ranges: Vec<&PartitionRange> =
            self.ranges.iter().filter(|r| !r.is_null_bucket()).collect();
        data_ranges.sort_by_key(|r| r.min);

        for pair in data_ranges.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a.is_open_ended() {
                return Err(format!(
                    "range {} is open-ended but is not last",
                    a.part_number
                ));
            }
            if b.min != a.max + 1 {
                return Err(format!(
                    "gap or overlap between range {} (max={}) and range {} (min={})",
                    a.part_number, a.max, b.part_number, b.min
                ));
            }
        }

        let null_buckets = self.ranges.iter().filter(|r| r.is_null_bucket()).count();
        match (*nullable, null_buckets) {
            (true, 1) | (false, 0) => Ok(()),
            (true, 0) => Err("nullable key but no NULL bucket present".to_string()),
            (false, n) if n > 0 => Err("non-nullable key but NULL bucket present".to_string()),
            (_, n) => Err(format!("expected at most one NULL bucket, found {n}")),
        }
    }
}
