use neuralnetworks::EpochRecord;

/// Per-epoch records of the active model, in epoch order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsHistory {
    records: Vec<EpochRecord>,
}

impl MetricsHistory {
    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.records.last()
    }

    /// Record with the highest validation accuracy, the earliest on ties.
    pub fn best(&self) -> Option<&EpochRecord> {
        self.records.iter().fold(None, |best: Option<&EpochRecord>, r| match best {
            Some(b) if b.val_accuracy >= r.val_accuracy => Some(b),
            _ => Some(r),
        })
    }
}

/// Unweighted mean of per-batch values, so a short final batch counts as
/// much as a full one.
pub fn batch_mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}
