use serde::Serialize;

use crate::format::cod::{CodFile, CodOpCode};

/// A label attached to one op index.
///
/// Strong labels mark procedure entries, where the stack is empty by contract.
/// Weak labels are synthesized for jump and call targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    pub names: Vec<String>,
    pub strong: bool,
    /// Behavior whose symbols are in scope from this label on. `None` for globals.
    pub scope: Option<usize>,
}

impl Label {
    pub fn name(&self) -> String {
        match self.names.as_slice() {
            [single] => single.clone(),
            names => format!("SHARED: {}", names.join(", ")),
        }
    }
}

/// Labels indexed by op index, one slot per op.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    slots: Vec<Option<Label>>,
}

impl LabelTable {
    pub fn with_len(len: usize) -> Self {
        Self { slots: vec![None; len] }
    }

    /// Discover procedure entries first, then jump and call targets.
    pub fn discover(cod: &CodFile) -> Self {
        let mut table = Self::with_len(cod.ops.len());

        for proc in &cod.global_procedures {
            table.set_at(proc.offset as i64 - 1, &proc.name, true, None);
        }
        for (scope, behavior) in cod.behaviors.iter().enumerate() {
            for proc in &behavior.procedures {
                let name = format!("{}::{}", behavior.name, proc.name);
                table.set_at(proc.offset as i64 - 1, &name, true, Some(scope));
            }
        }
        for (offset, op) in cod.ops.iter().enumerate() {
            if op.code.is_jump() {
                let target = offset as i64 + op.arg as i64;
                table.set_at(target, &format!("loc_{}", target), false, None);
            } else if op.code == CodOpCode::Call {
                let target = op.arg as i64 - 1;
                table.set_at(target, &format!("proc_{}", target), false, None);
            }
        }
        table
    }

    fn set_at(&mut self, offset: i64, name: &str, strong: bool, scope: Option<usize>) {
        match usize::try_from(offset).ok().filter(|&o| o < self.slots.len()) {
            Some(offset) => self.set(offset, name, strong, scope),
            None => log::warn!("label {} points outside of the script ({})", name, offset),
        }
    }

    /// Attach `name` at `offset`. A strong name on a labeled offset is appended
    /// and upgrades it; a weak name never replaces an existing one.
    pub fn set(&mut self, offset: usize, name: &str, strong: bool, scope: Option<usize>) {
        match &mut self.slots[offset] {
            Some(label) => {
                if strong {
                    if !label.strong {
                        label.scope = scope;
                    }
                    label.strong = true;
                    label.names.push(name.to_string());
                }
            }
            empty => {
                *empty = Some(Label {
                    names: vec![name.to_string()],
                    strong,
                    scope,
                })
            }
        }
    }

    pub fn get(&self, offset: usize) -> Option<&Label> {
        self.slots.get(offset).and_then(Option::as_ref)
    }

    pub fn is_strong(&self, offset: usize) -> bool {
        self.get(offset).is_some_and(|l| l.strong)
    }

    /// Rendered name of the label at a possibly out-of-range target.
    pub fn name_at(&self, target: i64) -> Option<String> {
        usize::try_from(target).ok().and_then(|t| self.get(t)).map(Label::name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Label)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(offset, slot)| slot.as_ref().map(|label| (offset, label)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_names_do_not_stack() {
        let mut table = LabelTable::with_len(4);
        table.set(2, "loc_2", false, None);
        table.set(2, "proc_2", false, None);
        assert_eq!(table.get(2).unwrap().name(), "loc_2");
        assert!(!table.is_strong(2));
    }

    #[test]
    fn strong_upgrades_weak() {
        let mut table = LabelTable::with_len(4);
        table.set(1, "loc_1", false, None);
        table.set(1, "open", true, Some(0));
        let label = table.get(1).unwrap();
        assert!(label.strong);
        assert_eq!(label.scope, Some(0));
        assert_eq!(label.name(), "SHARED: loc_1, open");
    }

    #[test]
    fn strong_names_accumulate() {
        let mut table = LabelTable::with_len(1);
        table.set(0, "a", true, None);
        table.set(0, "b", true, None);
        table.set(0, "c", true, None);
        assert_eq!(table.get(0).unwrap().name(), "SHARED: a, b, c");
        assert_eq!(table.iter().count(), 1);
    }
}
