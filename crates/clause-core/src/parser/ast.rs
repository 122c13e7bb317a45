//! Clause language AST
//!
//! The parser produces a [`Module`] per logic file. The compiler resolves
//! every type reference to its fully-qualified name and combines the modules
//! into one [`Program`], which is what executable targets carry.
//!
//! All nodes are plain data and derive Serialize/Deserialize: the `ast`
//! target is literally the JSON form of a [`Program`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One parsed logic file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub namespace: Option<String>,
    /// Imported names as written: `a.b.Type` or `a.b.*`
    pub imports: Vec<String>,
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Contract(ContractDecl),
    Function(FunctionDecl),
    Constant(ConstantDecl),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDecl {
    pub name: String,
    /// Type of the contract data (`over T`)
    pub template: TypeRef,
    /// Type of the contract state (`state T`)
    pub state: Option<TypeRef>,
    pub clauses: Vec<ClauseDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub output: Option<TypeRef>,
    pub emits: Option<TypeRef>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub output: Option<TypeRef>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantDecl {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
}

/// A reference to a model type, e.g. `Foo` or `Double[]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRef {
    pub name: String,
    pub array: bool,
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef {
            name: name.into(),
            array: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Let { name: String, value: Expr },
    SetState(Expr),
    Emit(Expr),
    Enforce { condition: Expr, message: Option<Expr> },
    Throw(Expr),
    If { condition: Expr, then: Vec<Stmt>, otherwise: Vec<Stmt> },
    While { condition: Expr, body: Vec<Stmt> },
    Return(Option<Expr>),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Var(String),
    Field { target: Box<Expr>, name: String },
    /// `Type{ field: value, ... }`; `class` is fully qualified after compilation
    Record { class: String, fields: Vec<(String, Expr)> },
    Array(Vec<Expr>),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    If { condition: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Call { function: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Nil,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Concat,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Concat => "++",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

// ── Compiled program ──────────────────────────────────────

/// Combined, name-resolved logic: the unit an executable is built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub contract: Option<ContractInfo>,
    pub functions: Vec<FunctionDecl>,
    pub constants: Vec<ConstantDecl>,
    /// Class → direct super type, snapshotted from the model at compile time
    #[serde(default)]
    pub supertypes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractInfo {
    /// Contract identity: `namespace.Name`, or `Name` without a namespace
    pub name: String,
    pub template: String,
    pub state: Option<String>,
    pub clauses: Vec<ClauseDecl>,
}

impl Program {
    pub fn clause(&self, name: &str) -> Option<&ClauseDecl> {
        self.contract
            .as_ref()
            .and_then(|c| c.clauses.iter().find(|cl| cl.name == name))
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// `class` followed by its super types, nearest first
    pub fn ancestry(&self, class: &str) -> Vec<String> {
        let mut chain = vec![class.to_string()];
        while let Some(parent) = chain.last().and_then(|c| self.supertypes.get(c)) {
            if chain.contains(parent) {
                break;
            }
            chain.push(parent.clone());
        }
        chain
    }
}
