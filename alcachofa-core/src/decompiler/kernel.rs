use crate::format::schema::{NamedFunctionSignature, SchemaBlock};

/// Kernel procedures known from shipped scripts, in index order (1-based).
const KERNEL_PROC_NAMES: &[&str] = &[
    "playVideo",
    "playSound",
    "playMusic",
    "stopMusic",
    "waitForMusicToEnd",
    "showCenterBottomText",
    "stopAndTurn",
    "stopAndTurnMe",
    "changeCharacter",
    "sayText",
    "nop",
    "go",
    "put",
    "changeCharacterRoom",
    "killProcesses",
    "timer",
    "on",
    "off",
    "pickup",
    "characterPickup",
    "drop",
    "characterDrop",
    "delay",
    "hadNoMousePressFor",
    "nop",
    "fork",
    "animate",
    "animateCharacter",
    "animateTalking",
    "changeRoom",
    "toggleRoomFloor",
    "setDialogLineReturn",
    "dialogMenu",
    "clearInventory",
    "nop",
    "fadeType0",
    "fadeType1",
    "setLodBias",
    "fadeType2",
    "setActiveTextureSet",
    "setMaxCamSpeedFactor",
    "waitCamStopping",
    "camFollow",
    "camShake",
    "lerpCamXY",
    "lerpCamZ",
    "lerpCamScale",
    "lerpCamToObjectWithScale",
    "lerpCamToObjectResettingZ",
    "lerpCamRotation",
    "fadeIn",
    "fadeOut",
    "fadeIn2",
    "fadeOut2",
    "lerpCamXYZ",
    "lerpCamToObjectKeepingZ",
];

/// Names and signatures of kernel procedures, by the 1-based index used in bytecode.
pub enum KernelTable<'a> {
    Schema(Vec<&'a NamedFunctionSignature>),
    Builtin,
}

impl<'a> KernelTable<'a> {
    pub fn new(schema: Option<&'a SchemaBlock>) -> Self {
        match schema {
            Some(schema) => KernelTable::Schema(schema.kernel_calls().collect()),
            None => KernelTable::Builtin,
        }
    }

    fn slot(index: i32, len: usize) -> Option<usize> {
        usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .filter(|&i| i < len)
    }

    pub fn name(&self, index: i32) -> String {
        let name = match self {
            KernelTable::Schema(calls) => Self::slot(index, calls.len()).map(|i| calls[i].name.as_str()),
            KernelTable::Builtin => Self::slot(index, KERNEL_PROC_NAMES.len()).map(|i| KERNEL_PROC_NAMES[i]),
        };
        match name {
            Some("nop") => format!("nop{}", index),
            Some(name) => name.to_string(),
            None => format!("invalid kernel({})", index),
        }
    }

    /// Parameter count, known only from schema signatures.
    pub fn arity(&self, index: i32) -> Option<usize> {
        match self {
            KernelTable::Schema(calls) => {
                Self::slot(index, calls.len()).map(|i| calls[i].signature.parameters.len())
            }
            KernelTable::Builtin => None,
        }
    }
}
