/// What a value on the symbolic stack is known to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Number(i32),
    String,
    /// Address of a variable. `name` is what a dereference renders as.
    Address { name: String },
    Compound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub text: String,
    pub needs_brackets: bool,
}

impl Expr {
    pub fn number(value: i32) -> Self {
        Self {
            kind: ExprKind::Number(value),
            text: value.to_string(),
            needs_brackets: false,
        }
    }

    pub fn string(text: String) -> Self {
        Self {
            kind: ExprKind::String,
            text,
            needs_brackets: false,
        }
    }

    pub fn address(name: String, resolved: bool) -> Self {
        let text = if resolved { format!("&{}", name) } else { name.clone() };
        Self {
            kind: ExprKind::Address { name },
            text,
            needs_brackets: false,
        }
    }

    pub fn compound(text: String) -> Self {
        Self {
            kind: ExprKind::Compound,
            text,
            needs_brackets: true,
        }
    }

    /// A compound that renders without brackets: names, calls, placeholders.
    pub fn atom(text: impl Into<String>) -> Self {
        Self {
            kind: ExprKind::Compound,
            text: text.into(),
            needs_brackets: false,
        }
    }

    pub fn error() -> Self {
        Self::atom("ERROR")
    }

    pub fn bracketed(&self) -> String {
        if self.needs_brackets {
            format!("({})", self.text)
        } else {
            self.text.clone()
        }
    }

    /// Strings and addresses where a number is expected.
    pub fn is_non_numeric(&self) -> bool {
        matches!(self.kind, ExprKind::String | ExprKind::Address { .. })
    }

    /// Whether duplicating the text would repeat a side effect.
    pub fn needs_temporary(&self) -> bool {
        self.kind == ExprKind::Compound && !self.text.starts_with("tmp_")
    }
}
