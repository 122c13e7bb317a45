//! Evaluator for compiled clause programs
//!
//! Runs one call shape over one invocation context and returns the boxed
//! response, state and emits. The evaluator polls an optional abort flag on
//! every statement and loop iteration, and bounds function-call nesting.
//!
//! Guarantees:
//! - Deterministic: same program, context and call give the same output
//! - Integer arithmetic is checked; overflow and division by zero are faults

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{InvocationContext, RunOutput, Value};
use crate::logic::CallShape;
use crate::parser::ast::*;

/// Why evaluation stopped early
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Thrown error, failed enforce, or evaluator fault
    Runtime(String),
    /// The abort flag was raised
    Aborted,
}

type Eval<T> = std::result::Result<T, Fault>;

fn fault<T>(message: impl Into<String>) -> Eval<T> {
    Err(Fault::Runtime(message.into()))
}

/// Evaluation limits
#[derive(Debug, Clone, Copy)]
pub struct Limits<'a> {
    pub max_call_depth: usize,
    pub abort: Option<&'a AtomicBool>,
}

/// Run `call` and collect its outputs
pub fn execute(
    program: &Program,
    context: &InvocationContext,
    call: &CallShape,
    limits: Limits<'_>,
) -> Eval<RunOutput> {
    let mut interpreter = Interpreter {
        program,
        limits,
        depth: 0,
        constants: BTreeMap::new(),
        state: Value::from_boxed(&context.state),
        emits: Vec::new(),
    };
    interpreter.evaluate_constants()?;

    let input = Value::from_boxed(&context.input);
    let (clause, args) = match call {
        CallShape::Dispatch => {
            let clause = interpreter.dispatch(&input)?;
            let mut args = BTreeMap::new();
            if let Some(param) = clause.params.first() {
                args.insert(param.name.clone(), input);
            }
            (clause, args)
        }
        CallShape::NamedClause(name) => match program.clause(name) {
            Some(clause) => (clause, named_arguments(clause, input)?),
            None if name == "init" => {
                // Logic without an init clause keeps the state it was given
                return Ok(RunOutput {
                    response: serde_json::Value::Null,
                    state: context.state.clone(),
                    emit: Value::Array(Vec::new()).to_boxed(),
                });
            }
            None => return fault(format!("clause '{}' is not defined", name)),
        },
    };

    let mut frame = args;
    frame.insert("contract".to_string(), Value::from_boxed(&context.contract));
    frame.insert("now".to_string(), Value::String(context.now.clone()));
    frame.insert("utcOffset".to_string(), Value::Integer(i64::from(context.utc_offset)));
    let mut env = Env {
        frames: vec![frame],
        in_clause: true,
    };

    let response = match interpreter.block(&clause.body, &mut env)? {
        Flow::Return(value) => value,
        Flow::Next => Value::Null,
    };

    Ok(RunOutput {
        response: response.to_boxed(),
        state: interpreter.state.to_boxed(),
        emit: Value::Array(interpreter.emits).to_boxed(),
    })
}

fn named_arguments(clause: &ClauseDecl, input: Value) -> Eval<BTreeMap<String, Value>> {
    let mut record = match input {
        Value::Object(record) => record,
        Value::Null => BTreeMap::new(),
        other => {
            return fault(format!(
                "parameters for '{}' must be a record, found {}",
                clause.name,
                other.type_name()
            ))
        }
    };
    let mut args = BTreeMap::new();
    for param in &clause.params {
        match record.remove(&param.name) {
            Some(value) => {
                args.insert(param.name.clone(), value);
            }
            None => {
                return fault(format!(
                    "missing argument '{}' for clause '{}'",
                    param.name, clause.name
                ))
            }
        }
    }
    Ok(args)
}

enum Flow {
    Next,
    Return(Value),
}

struct Env {
    frames: Vec<BTreeMap<String, Value>>,
    /// Clause bodies read `state`; function bodies do not
    in_clause: bool,
}

impl Env {
    fn define(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }
}

struct Interpreter<'a> {
    program: &'a Program,
    limits: Limits<'a>,
    depth: usize,
    constants: BTreeMap<String, Value>,
    state: Value,
    emits: Vec<Value>,
}

impl<'a> Interpreter<'a> {
    fn check_abort(&self) -> Eval<()> {
        match self.limits.abort {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(Fault::Aborted),
            _ => Ok(()),
        }
    }

    fn evaluate_constants(&mut self) -> Eval<()> {
        let program = self.program;
        for constant in &program.constants {
            let mut env = Env {
                frames: vec![BTreeMap::new()],
                in_clause: false,
            };
            let value = self.expr(&constant.value, &mut env)?;
            self.constants.insert(constant.name.clone(), value);
        }
        Ok(())
    }

    /// The clause whose first parameter type is nearest to the request's class
    fn dispatch(&self, request: &Value) -> Eval<&'a ClauseDecl> {
        let program = self.program;
        let Some(contract) = program.contract.as_ref() else {
            return fault("no contract is declared");
        };
        let Some(class) = request.class() else {
            return fault("request has no $class");
        };
        program
            .ancestry(class)
            .iter()
            .find_map(|ancestor| {
                contract.clauses.iter().find(|clause| {
                    clause
                        .params
                        .first()
                        .is_some_and(|p| !p.ty.array && &p.ty.name == ancestor)
                })
            })
            .map_or_else(
                || fault(format!("no clause accepts a request of type '{}'", class)),
                Ok,
            )
    }

    // ── Statements ─────────────────────────────────────────

    fn block(&mut self, body: &[Stmt], env: &mut Env) -> Eval<Flow> {
        env.frames.push(BTreeMap::new());
        let mut flow = Ok(Flow::Next);
        for stmt in body {
            match self.stmt(stmt, env) {
                Ok(Flow::Next) => {}
                other => {
                    flow = other;
                    break;
                }
            }
        }
        env.frames.pop();
        flow
    }

    fn stmt(&mut self, stmt: &Stmt, env: &mut Env) -> Eval<Flow> {
        self.check_abort()?;
        match stmt {
            Stmt::Let { name, value } => {
                let value = self.expr(value, env)?;
                env.define(name, value);
            }
            Stmt::SetState(value) => {
                self.state = self.expr(value, env)?;
            }
            Stmt::Emit(value) => match self.expr(value, env)? {
                Value::Array(events) => self.emits.extend(events),
                event => self.emits.push(event),
            },
            Stmt::Enforce { condition, message } => {
                if !self.condition(condition, env)? {
                    let message = match message {
                        Some(message) => self.expr(message, env)?.to_text(),
                        None => "enforce condition failed".to_string(),
                    };
                    return Err(Fault::Runtime(message));
                }
            }
            Stmt::Throw(value) => {
                return Err(Fault::Runtime(self.expr(value, env)?.to_text()));
            }
            Stmt::If {
                condition,
                then,
                otherwise,
            } => {
                let branch = if self.condition(condition, env)? {
                    then
                } else {
                    otherwise
                };
                return self.block(branch, env);
            }
            Stmt::While { condition, body } => loop {
                self.check_abort()?;
                if !self.condition(condition, env)? {
                    break;
                }
                if let Flow::Return(value) = self.block(body, env)? {
                    return Ok(Flow::Return(value));
                }
            },
            Stmt::Return(value) => {
                let value = match value {
                    Some(value) => self.expr(value, env)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Expr(value) => {
                self.expr(value, env)?;
            }
        }
        Ok(Flow::Next)
    }

    fn condition(&mut self, expr: &Expr, env: &mut Env) -> Eval<bool> {
        match self.expr(expr, env)? {
            Value::Boolean(b) => Ok(b),
            other => fault(format!("condition must be a Boolean, found {}", other.type_name())),
        }
    }

    // ── Expressions ────────────────────────────────────────

    fn expr(&mut self, expr: &Expr, env: &mut Env) -> Eval<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Nil => Value::Null,
                Literal::Boolean(b) => Value::Boolean(*b),
                Literal::Integer(i) => Value::Integer(*i),
                Literal::Double(f) => finite(*f)?,
                Literal::String(s) => Value::String(s.clone()),
            }),
            Expr::Var(name) => self.lookup(name, env),
            Expr::Field { target, name } => match self.expr(target, env)? {
                Value::Object(mut map) => Ok(map.remove(name).unwrap_or(Value::Null)),
                other => fault(format!(
                    "cannot read field '{}' of {}",
                    name,
                    other.type_name()
                )),
            },
            Expr::Record { class, fields } => {
                let mut map = BTreeMap::new();
                map.insert("$class".to_string(), Value::String(class.clone()));
                for (name, value) in fields {
                    let value = self.expr(value, env)?;
                    if value != Value::Null {
                        map.insert(name.clone(), value);
                    }
                }
                Ok(Value::Object(map))
            }
            Expr::Array(items) => items
                .iter()
                .map(|item| self.expr(item, env))
                .collect::<Eval<Vec<_>>>()
                .map(Value::Array),
            Expr::Unary { op, operand } => {
                let operand = self.expr(operand, env)?;
                match (op, operand) {
                    (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
                    (UnaryOp::Neg, Value::Integer(i)) => i
                        .checked_neg()
                        .map(Value::Integer)
                        .map_or_else(|| fault("integer overflow"), Ok),
                    (UnaryOp::Neg, Value::Float(f)) => finite(-f),
                    (op, other) => fault(format!(
                        "cannot apply {} to {}",
                        if *op == UnaryOp::Not { "!" } else { "-" },
                        other.type_name()
                    )),
                }
            }
            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    Ok(Value::Boolean(self.condition(lhs, env)? && self.condition(rhs, env)?))
                }
                BinaryOp::Or => {
                    Ok(Value::Boolean(self.condition(lhs, env)? || self.condition(rhs, env)?))
                }
                _ => {
                    let lhs = self.expr(lhs, env)?;
                    let rhs = self.expr(rhs, env)?;
                    binary(*op, lhs, rhs)
                }
            },
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                if self.condition(condition, env)? {
                    self.expr(then, env)
                } else {
                    self.expr(otherwise, env)
                }
            }
            Expr::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.expr(arg, env))
                    .collect::<Eval<Vec<_>>>()?;
                self.call(function, args)
            }
        }
    }

    fn lookup(&self, name: &str, env: &Env) -> Eval<Value> {
        if let Some(value) = env.frames.iter().rev().find_map(|f| f.get(name)) {
            return Ok(value.clone());
        }
        if env.in_clause && name == "state" {
            return Ok(self.state.clone());
        }
        match self.constants.get(name) {
            Some(value) => Ok(value.clone()),
            None => fault(format!("'{}' is not bound", name)),
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Eval<Value> {
        if let Some(result) = builtin(name, &args) {
            return result;
        }
        let program = self.program;
        let Some(function) = program.function(name) else {
            return fault(format!("unknown function '{}'", name));
        };
        if function.params.len() != args.len() {
            return fault(format!(
                "'{}' takes {} argument(s) but {} were given",
                name,
                function.params.len(),
                args.len()
            ));
        }
        if self.depth >= self.limits.max_call_depth {
            return fault(format!(
                "maximum call depth of {} exceeded in '{}'",
                self.limits.max_call_depth, name
            ));
        }

        let frame = function
            .params
            .iter()
            .map(|p| p.name.clone())
            .zip(args)
            .collect();
        let mut env = Env {
            frames: vec![frame],
            in_clause: false,
        };
        self.depth += 1;
        let flow = self.block(&function.body, &mut env);
        self.depth -= 1;
        Ok(match flow? {
            Flow::Return(value) => value,
            Flow::Next => Value::Null,
        })
    }
}

// ── Operators and built-ins ───────────────────────────────

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Eval<Value> {
    use Value::{Float, Integer};

    let mismatch = |lhs: &Value, rhs: &Value| {
        fault(format!(
            "cannot apply '{}' to {} and {}",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ))
    };

    match op {
        BinaryOp::Concat => Ok(Value::String(lhs.to_text() + &rhs.to_text())),
        BinaryOp::Eq => Ok(Value::Boolean(equal(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Boolean(!equal(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => match (number(&lhs), number(&rhs)) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
            };
            let Some(ordering) = ordering else {
                return mismatch(&lhs, &rhs);
            };
            Ok(Value::Boolean(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        _ => match (&lhs, &rhs) {
            (Integer(a), Integer(b)) => {
                let (a, b) = (*a, *b);
                let result = match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    BinaryOp::Mul => a.checked_mul(b),
                    BinaryOp::Div | BinaryOp::Rem if b == 0 => return fault("division by zero"),
                    BinaryOp::Div => a.checked_div(b),
                    _ => a.checked_rem(b),
                };
                result.map(Integer).map_or_else(|| fault("integer overflow"), Ok)
            }
            _ => match (number(&lhs), number(&rhs)) {
                (Some(a), Some(b)) => finite(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    _ => a % b,
                }),
                _ => mismatch(&lhs, &rhs),
            },
        },
    }
}

/// Doubles leave the evaluator only as finite numbers
fn finite(result: f64) -> Eval<Value> {
    if result.is_finite() {
        Ok(Value::Float(result))
    } else {
        fault(format!("non-finite result '{}'", result))
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Integer(_), Value::Float(_)) | (Value::Float(_), Value::Integer(_)) => {
            number(lhs) == number(rhs)
        }
        _ => lhs == rhs,
    }
}

fn builtin(name: &str, args: &[Value]) -> Option<Eval<Value>> {
    let result = match (name, args) {
        ("length", [Value::String(s)]) => Ok(Value::Integer(s.chars().count() as i64)),
        ("length", [Value::Array(items)]) => Ok(Value::Integer(items.len() as i64)),
        ("toString", [value]) => Ok(Value::String(value.to_text())),
        ("abs", [Value::Integer(i)]) => i
            .checked_abs()
            .map(Value::Integer)
            .map_or_else(|| fault("integer overflow"), Ok),
        ("abs", [Value::Float(f)]) => finite(f.abs()),
        ("min" | "max", [Value::Integer(a), Value::Integer(b)]) => Ok(Value::Integer(
            if name == "min" { *a.min(b) } else { *a.max(b) },
        )),
        ("min" | "max", [a, b]) => match (number(a), number(b)) {
            (Some(a), Some(b)) => Ok(Value::Float(if name == "min" { a.min(b) } else { a.max(b) })),
            _ => fault(format!("'{}' expects numbers", name)),
        },
        ("length" | "toString" | "abs", [value]) => fault(format!(
            "'{}' cannot be applied to {}",
            name,
            value.type_name()
        )),
        ("length" | "toString" | "abs" | "min" | "max", _) => fault(format!(
            "'{}' called with {} argument(s)",
            name,
            args.len()
        )),
        _ => return None,
    };
    Some(result)
}
