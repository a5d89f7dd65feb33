use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{ExprId, MethodBody};
use crate::known::KnownMembers;

/// Identity of a resolved symbol (local, parameter, member, method).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SymbolId(pub(crate) u32);

/// Declaration classification of a symbol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SymbolKind {
    Local { foreach: bool },
    Parameter,
    Field { readonly: bool },
    Property,
    Method,
    Other,
}

impl SymbolKind {
    pub fn is_local(&self) -> bool {
        matches!(self, SymbolKind::Local { .. })
    }
}

/// Null-check idiom a member participates in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckIdiom {
    /// `IsNullOrEmpty`-style predicates; truth is treated as the null case.
    Emptiness,
    /// `bool TryX(.., out target)`; success proves the out binding non-null.
    TryParse,
    /// Assert-not-null-or-fail call scoping the rest of the sequence.
    Constraint,
}

/// Symbol and type facts supplied by the host compiler. The engine only
/// ever talks to this capability; it has no dependency on any concrete
/// semantic service.
pub trait SemanticModel {
    /// Symbol behind a value-producing expression, when resolvable.
    fn symbol_of(&self, expr: ExprId) -> Option<SymbolId>;

    fn kind_of(&self, symbol: SymbolId) -> SymbolKind;

    /// Carries a `NotNull`-style annotation (directly or via its property).
    fn annotated_non_null(&self, symbol: SymbolId) -> bool;

    /// Member of the known-non-null framework table or the allowlist file.
    fn known_non_null(&self, symbol: SymbolId) -> bool;

    fn check_idiom(&self, symbol: SymbolId) -> Option<CheckIdiom>;

    /// Invocations of this method produce a value type (never null).
    fn returns_value_type(&self, symbol: SymbolId) -> bool;

    /// Locals assigned on every path through `body`; the external
    /// definite-assignment fact this engine does not recompute.
    fn always_assigned(&self, body: &MethodBody) -> Vec<SymbolId>;
}

#[derive(Clone, Debug)]
struct SymbolInfo {
    name: String,
    qualified: Option<String>,
    kind: SymbolKind,
    annotated_non_null: bool,
    returns_value_type: bool,
    idiom: Option<CheckIdiom>,
}

/// Table-backed `SemanticModel`. `AstBuilder` records resolutions into it;
/// facts a compiler would derive are declared explicitly.
#[derive(Debug, Default)]
pub struct SymbolTable {
    infos: Vec<SymbolInfo>,
    resolutions: BTreeMap<ExprId, SymbolId>,
    always_assigned: BTreeSet<SymbolId>,
    known: KnownMembers,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known_members(&self) -> &KnownMembers {
        &self.known
    }

    pub fn known_members_mut(&mut self) -> &mut KnownMembers {
        &mut self.known
    }

    fn declare(&mut self, name: &str, kind: SymbolKind) -> SymbolId {
        self.infos.push(SymbolInfo {
            name: name.to_string(),
            qualified: None,
            kind,
            annotated_non_null: false,
            returns_value_type: false,
            idiom: None,
        });
        SymbolId((self.infos.len() - 1) as u32)
    }

    pub fn declare_local(&mut self, name: &str) -> SymbolId {
        self.declare(name, SymbolKind::Local { foreach: false })
    }

    pub fn declare_parameter(&mut self, name: &str) -> SymbolId {
        self.declare(name, SymbolKind::Parameter)
    }

    pub fn declare_field(&mut self, name: &str, readonly: bool) -> SymbolId {
        self.declare(name, SymbolKind::Field { readonly })
    }

    pub fn declare_property(&mut self, name: &str) -> SymbolId {
        self.declare(name, SymbolKind::Property)
    }

    /// Declares a method; `qualified` is its `Type.Member` name used for
    /// known-member lookups.
    pub fn declare_method(&mut self, name: &str, qualified: &str) -> SymbolId {
        let id = self.declare(name, SymbolKind::Method);
        self.infos[id.0 as usize].qualified = Some(qualified.to_string());
        id
    }

    pub fn name(&self, symbol: SymbolId) -> &str {
        &self.infos[symbol.0 as usize].name
    }

    pub fn set_kind(&mut self, symbol: SymbolId, kind: SymbolKind) {
        self.infos[symbol.0 as usize].kind = kind;
    }

    pub fn set_qualified(&mut self, symbol: SymbolId, qualified: &str) {
        self.infos[symbol.0 as usize].qualified = Some(qualified.to_string());
    }

    pub fn mark_annotated_non_null(&mut self, symbol: SymbolId) {
        self.infos[symbol.0 as usize].annotated_non_null = true;
    }

    pub fn mark_returns_value_type(&mut self, symbol: SymbolId) {
        self.infos[symbol.0 as usize].returns_value_type = true;
    }

    pub fn mark_idiom(&mut self, symbol: SymbolId, idiom: CheckIdiom) {
        self.infos[symbol.0 as usize].idiom = Some(idiom);
    }

    pub fn mark_always_assigned(&mut self, symbol: SymbolId) {
        self.always_assigned.insert(symbol);
    }

    pub fn resolve(&mut self, expr: ExprId, symbol: SymbolId) {
        self.resolutions.insert(expr, symbol);
    }
}

impl SemanticModel for SymbolTable {
    fn symbol_of(&self, expr: ExprId) -> Option<SymbolId> {
        self.resolutions.get(&expr).copied()
    }

    fn kind_of(&self, symbol: SymbolId) -> SymbolKind {
        self.infos[symbol.0 as usize].kind
    }

    fn annotated_non_null(&self, symbol: SymbolId) -> bool {
        self.infos[symbol.0 as usize].annotated_non_null
    }

    fn known_non_null(&self, symbol: SymbolId) -> bool {
        let info = &self.infos[symbol.0 as usize];
        match &info.qualified {
            Some(qualified) => self.known.is_non_null(qualified),
            None => false,
        }
    }

    fn check_idiom(&self, symbol: SymbolId) -> Option<CheckIdiom> {
        let info = &self.infos[symbol.0 as usize];
        if info.idiom.is_some() {
            return info.idiom;
        }
        info.qualified
            .as_deref()
            .and_then(|qualified| self.known.idiom_of(qualified))
    }

    fn returns_value_type(&self, symbol: SymbolId) -> bool {
        self.infos[symbol.0 as usize].returns_value_type
    }

    fn always_assigned(&self, body: &MethodBody) -> Vec<SymbolId> {
        let _ = body;
        self.always_assigned.iter().copied().collect()
    }
}
