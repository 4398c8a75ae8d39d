//! Parser/emitter event model.

use crate::intern::InternedString;

/// Maximum dot-separated components in one output target.
pub const MAX_OUTPUT_TARGET_COMPONENTS: usize = 8;

/// Where a setter lands: a dot-separated field path with an optional
/// array index attached to the last component.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputTarget {
    pub components: Vec<InternedString>,
    pub array_index: Option<u32>,
}

impl OutputTarget {
    /// Dotted path for log messages.
    pub fn path(&self) -> String {
        let mut out = String::new();
        for (position, component) in self.components.iter().enumerate() {
            if position > 0 {
                out.push('.');
            }
            out.push_str(component.as_str());
        }
        if let Some(index) = self.array_index {
            out.push_str(&format!("[{index}]"));
        }
        out
    }
}

/// One parsed readable-data event.
///
/// Setters carry homogeneous value lists; mixing value kinds within one
/// statement is a parse error.
#[derive(Clone, Debug, PartialEq)]
pub enum RdEvent {
    ElementalIdentifierSetter {
        target: OutputTarget,
        values: Vec<InternedString>,
    },
    ElementalStringSetter {
        target: OutputTarget,
        values: Vec<String>,
    },
    ElementalIntegerSetter {
        target: OutputTarget,
        values: Vec<i64>,
    },
    ElementalFloatingSetter {
        target: OutputTarget,
        values: Vec<f64>,
    },
    StructuralSetterBegin {
        target: OutputTarget,
    },
    ArrayAppenderBegin {
        target: OutputTarget,
    },
    BlockEnd,
}

impl RdEvent {
    pub fn target(&self) -> Option<&OutputTarget> {
        match self {
            RdEvent::ElementalIdentifierSetter { target, .. }
            | RdEvent::ElementalStringSetter { target, .. }
            | RdEvent::ElementalIntegerSetter { target, .. }
            | RdEvent::ElementalFloatingSetter { target, .. }
            | RdEvent::StructuralSetterBegin { target }
            | RdEvent::ArrayAppenderBegin { target } => Some(target),
            RdEvent::BlockEnd => None,
        }
    }
}
