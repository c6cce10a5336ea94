use super::formula::Formula;

/// A `Formula` with a required `measure` block. Kept as a thin wrapper
/// (rather than a duplicate struct) so goal selection can reuse
/// `Formula`'s fields directly; `Goal::try_from_formula` is the only
/// place that enforces "has a measure".
#[derive(Clone, Debug)]
pub struct Goal(pub Formula);

impl Goal {
    pub fn try_from_formula(formula: Formula) -> Option<Self> {
        if formula.measure.is_some() {
            Some(Self(formula))
        } else {
            None
        }
    }

    pub fn formula(&self) -> &Formula {
        &self.0
    }
}
