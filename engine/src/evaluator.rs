use blocks::formula::{BinaryOperator, Expr, Function, UnaryOperator, Variable};
use blocks::Formula;

use crate::error::EvalError;

/// Inputs available to a coupling formula, all in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Scalars {
    pub primary: f64,
    pub dependent: f64,
    pub delta_primary: f64,
}

impl Scalars {
    fn get(&self, variable: Variable) -> f64 {
        match variable {
            Variable::Primary => self.primary,
            Variable::Dependent => self.dependent,
            Variable::DeltaPrimary => self.delta_primary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Number(f64),
    Boolean(bool),
}

impl Value {
    fn type_name(self) -> &'static str {
        match self {
            Value::Number(_) => "Number",
            Value::Boolean(_) => "Boolean",
        }
    }

    fn is_truthy(self) -> bool {
        match self {
            Value::Boolean(b) => b,
            Value::Number(n) => n != 0.0,
        }
    }
}

/// Evaluate a formula to a finite number.
///
/// Pure and deterministic: the same scalars always give the same result, and
/// each conditional evaluates exactly one branch.
pub fn evaluate(formula: &Formula, scalars: &Scalars) -> Result<f64, EvalError> {
    match eval(&formula.expr, scalars)? {
        Value::Number(n) => finite(n),
        other => Err(EvalError::TypeError {
            expected: "Number",
            got: other.type_name(),
        }),
    }
}

fn eval(expr: &Expr, scalars: &Scalars) -> Result<Value, EvalError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Boolean(b) => Ok(Value::Boolean(*b)),
        Expr::Variable(v) => Ok(Value::Number(finite(scalars.get(*v))?)),

        Expr::Unary { operator, operand } => {
            let value = eval(operand, scalars)?;
            match operator {
                UnaryOperator::Negation => Ok(Value::Number(-coerce_number(value)?)),
                UnaryOperator::LogicalNot => Ok(Value::Boolean(!value.is_truthy())),
            }
        }

        // Short-circuit: the right operand is only evaluated when needed.
        Expr::Binary {
            operator: BinaryOperator::LogicalAnd,
            left,
            right,
        } => {
            let l = eval(left, scalars)?;
            if !l.is_truthy() {
                return Ok(Value::Boolean(false));
            }
            Ok(Value::Boolean(eval(right, scalars)?.is_truthy()))
        }
        Expr::Binary {
            operator: BinaryOperator::LogicalOr,
            left,
            right,
        } => {
            let l = eval(left, scalars)?;
            if l.is_truthy() {
                return Ok(Value::Boolean(true));
            }
            Ok(Value::Boolean(eval(right, scalars)?.is_truthy()))
        }

        Expr::Binary { operator, left, right } => {
            let l = eval(left, scalars)?;
            let r = eval(right, scalars)?;
            eval_binary_op(*operator, l, r)
        }

        Expr::Conditional {
            condition,
            true_branch,
            false_branch,
        } => {
            if eval(condition, scalars)?.is_truthy() {
                eval(true_branch, scalars)
            } else {
                eval(false_branch, scalars)
            }
        }

        Expr::Call { function, arguments } => {
            let mut args = Vec::with_capacity(arguments.len());
            for argument in arguments {
                args.push(coerce_number(eval(argument, scalars)?)?);
            }
            let result = match (function, args.as_slice()) {
                (Function::Sin, [x]) => x.sin(),
                (Function::Cos, [x]) => x.cos(),
                (Function::Tan, [x]) => x.tan(),
                (Function::Asin, [x]) => x.asin(),
                (Function::Acos, [x]) => x.acos(),
                (Function::Atan, [x]) => x.atan(),
                (Function::Abs, [x]) => x.abs(),
                (Function::Sqrt, [x]) => x.sqrt(),
                (Function::Min, [a, b]) => a.min(*b),
                (Function::Max, [a, b]) => a.max(*b),
                // Arity is checked by the parser.
                _ => f64::NAN,
            };
            Ok(Value::Number(finite(result)?))
        }
    }
}

fn eval_binary_op(op: BinaryOperator, l: Value, r: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOperator::Equality => return Ok(Value::Boolean(values_equal(l, r)?)),
        BinaryOperator::Inequality => return Ok(Value::Boolean(!values_equal(l, r)?)),
        _ => {}
    }

    let a = coerce_number(l)?;
    let b = coerce_number(r)?;
    let value = match op {
        BinaryOperator::Addition => Value::Number(a + b),
        BinaryOperator::Subtraction => Value::Number(a - b),
        BinaryOperator::Multiplication => Value::Number(a * b),
        BinaryOperator::Division => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Value::Number(a / b)
        }
        BinaryOperator::Modulo => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Value::Number(a % b)
        }
        BinaryOperator::GreaterThan => Value::Boolean(a > b),
        BinaryOperator::LessThan => Value::Boolean(a < b),
        BinaryOperator::GreaterThanOrEqual => Value::Boolean(a >= b),
        BinaryOperator::LessThanOrEqual => Value::Boolean(a <= b),
        BinaryOperator::Equality
        | BinaryOperator::Inequality
        | BinaryOperator::LogicalAnd
        | BinaryOperator::LogicalOr => unreachable!("handled before numeric coercion"),
    };
    match value {
        Value::Number(n) => Ok(Value::Number(finite(n)?)),
        boolean => Ok(boolean),
    }
}

fn values_equal(l: Value, r: Value) -> Result<bool, EvalError> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => Ok(a == b),
        (Value::Boolean(a), Value::Boolean(b)) => Ok(a == b),
        (Value::Number(_), other) | (other, Value::Number(_)) => Err(EvalError::TypeError {
            expected: "Number",
            got: other.type_name(),
        }),
    }
}

fn coerce_number(value: Value) -> Result<f64, EvalError> {
    match value {
        Value::Number(n) => Ok(n),
        other => Err(EvalError::TypeError {
            expected: "Number",
            got: other.type_name(),
        }),
    }
}

fn finite(n: f64) -> Result<f64, EvalError> {
    if n.is_finite() {
        Ok(n)
    } else {
        Err(EvalError::NonFinite(n))
    }
}
