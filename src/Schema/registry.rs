// Declared event kinds and their payload signatures.
// Pure in-memory description; nothing here touches shared memory.

use crate::error::SchemaError;
use std::fmt;

/// Maximum number of arguments in one signature.
pub const MAX_ARGS: usize = 32;

/// Maximum number of event kinds one registry can declare.
/// Bounded by the fixed schema table in the segment header.
pub const MAX_EVENTS: usize = 64;

/// Maximum length of an event name in bytes (one byte is kept for a NUL
/// terminator in the shared header).
pub const MAX_NAME_LEN: usize = 63;

/// Negotiated kind identifier. `0` means the monitor declined the kind.
pub type EventKindId = u64;

/// Reserved kind value: the monitor does not want this event.
pub const KIND_DECLINED: EventKindId = 0;

/// One argument slot of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCode {
    Char,
    Bool,
    Int,
    UInt,
    Long,
    Float,
    Double,
    Pointer,
    Timestamp,
    /// Variable-length string.
    Str,
    /// Whole input line (variable).
    Line,
    /// Whole regex match (variable).
    Match,
}

impl FieldCode {
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'c' => Self::Char,
            'b' => Self::Bool,
            'i' => Self::Int,
            'u' => Self::UInt,
            'l' => Self::Long,
            'f' => Self::Float,
            'd' => Self::Double,
            'p' => Self::Pointer,
            't' => Self::Timestamp,
            'S' => Self::Str,
            'L' => Self::Line,
            'M' => Self::Match,
            _ => return None,
        })
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Char => 'c',
            Self::Bool => 'b',
            Self::Int => 'i',
            Self::UInt => 'u',
            Self::Long => 'l',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::Pointer => 'p',
            Self::Timestamp => 't',
            Self::Str => 'S',
            Self::Line => 'L',
            Self::Match => 'M',
        }
    }

    /// Size in the fixed portion of a record, or `None` for variable fields.
    #[inline]
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Char | Self::Bool => Some(1),
            Self::Int | Self::UInt | Self::Float => Some(4),
            Self::Long | Self::Double | Self::Timestamp => Some(8),
            Self::Pointer => Some(std::mem::size_of::<usize>()),
            Self::Str | Self::Line | Self::Match => None,
        }
    }

    #[inline]
    pub fn is_variable(self) -> bool {
        self.fixed_size().is_none()
    }
}

/// A parsed signature: the ordered field codes of one event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    codes: Vec<FieldCode>,
}

impl Signature {
    /// Parse a signature string such as `"tll"` or `"pS"`.
    pub fn parse(event: &str, text: &str) -> Result<Self, SchemaError> {
        let mut codes = Vec::with_capacity(text.len());
        for c in text.chars() {
            let code = FieldCode::from_char(c).ok_or_else(|| SchemaError::UnknownFieldCode {
                event: event.to_string(),
                code: c,
            })?;
            codes.push(code);
        }

        if codes.len() > MAX_ARGS {
            return Err(SchemaError::TooManyArguments {
                event: event.to_string(),
                count: codes.len(),
                max: MAX_ARGS,
            });
        }

        Ok(Self { codes })
    }

    pub fn codes(&self) -> &[FieldCode] {
        &self.codes
    }

    /// Bytes taken by the fixed fields, in declaration order.
    pub fn fixed_size(&self) -> usize {
        self.codes.iter().filter_map(|c| c.fixed_size()).sum()
    }

    /// Number of variable-length fields.
    pub fn variable_count(&self) -> usize {
        self.codes.iter().filter(|c| c.is_variable()).count()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for code in &self.codes {
            write!(f, "{}", code.as_char())?;
        }
        Ok(())
    }
}

/// One declared event kind.
///
/// `assigned_kind` starts at [`KIND_DECLINED`] and is set exactly once,
/// during negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDeclaration {
    pub name: String,
    pub signature: Signature,
    /// Fixed bytes of one record of this kind, excluding the record header.
    pub computed_size: usize,
    pub assigned_kind: EventKindId,
}

impl EventDeclaration {
    pub fn new(name: &str, signature: &str) -> Result<Self, SchemaError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('\0') {
            return Err(SchemaError::InvalidName {
                name: name.to_string(),
                max: MAX_NAME_LEN,
            });
        }
        let signature = Signature::parse(name, signature)?;
        let computed_size = signature.fixed_size();
        Ok(Self {
            name: name.to_string(),
            signature,
            computed_size,
            assigned_kind: KIND_DECLINED,
        })
    }

    /// The negotiated kind, or `None` when the monitor declined it.
    #[inline]
    pub fn kind(&self) -> Option<EventKindId> {
        (self.assigned_kind != KIND_DECLINED).then_some(self.assigned_kind)
    }

    #[inline]
    pub fn is_wanted(&self) -> bool {
        self.assigned_kind != KIND_DECLINED
    }
}

/// Ordered, immutable set of declared event kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRegistry {
    events: Vec<EventDeclaration>,
}

impl SchemaRegistry {
    /// Declare the event kinds a producer can report.
    ///
    /// ```
    /// use dmxp_eventring::Schema::SchemaRegistry;
    /// let schema = SchemaRegistry::define([("read", "tl"), ("write", "tl")]).unwrap();
    /// assert_eq!(schema.len(), 2);
    /// ```
    pub fn define<I, N, S>(declarations: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (N, S)>,
        N: AsRef<str>,
        S: AsRef<str>,
    {
        let mut events: Vec<EventDeclaration> = Vec::new();
        for (name, signature) in declarations {
            let decl = EventDeclaration::new(name.as_ref(), signature.as_ref())?;
            if events.iter().any(|e| e.name == decl.name) {
                return Err(SchemaError::DuplicateEvent { name: decl.name });
            }
            events.push(decl);
        }

        if events.len() > MAX_EVENTS {
            return Err(SchemaError::TooManyEvents {
                count: events.len(),
                max: MAX_EVENTS,
            });
        }

        Ok(Self { events })
    }

    pub fn events(&self) -> &[EventDeclaration] {
        &self.events
    }

    pub fn get(&self, index: usize) -> Option<&EventDeclaration> {
        self.events.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.events.iter().position(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<EventDeclaration> {
        self.events
    }
}
