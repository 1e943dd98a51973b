use std::fmt;
use std::ops::Range;

use crate::parser::ParseError;
use crate::parser::expression::parse_formula;

/// The three scalars a coupling formula may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    /// Current angle of the primary joint.
    Primary,
    /// Current angle of the dependent joint being computed.
    Dependent,
    /// Effective delta applied to the primary joint.
    DeltaPrimary,
}

impl Variable {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "primary" => Some(Variable::Primary),
            "dependent" => Some(Variable::Dependent),
            "deltaPrimary" => Some(Variable::DeltaPrimary),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Variable::Primary => "primary",
            Variable::Dependent => "dependent",
            Variable::DeltaPrimary => "deltaPrimary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Abs,
    Sqrt,
    Min,
    Max,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sin" => Some(Function::Sin),
            "cos" => Some(Function::Cos),
            "tan" => Some(Function::Tan),
            "asin" => Some(Function::Asin),
            "acos" => Some(Function::Acos),
            "atan" => Some(Function::Atan),
            "abs" => Some(Function::Abs),
            "sqrt" => Some(Function::Sqrt),
            "min" => Some(Function::Min),
            "max" => Some(Function::Max),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Asin => "asin",
            Function::Acos => "acos",
            Function::Atan => "atan",
            Function::Abs => "abs",
            Function::Sqrt => "sqrt",
            Function::Min => "min",
            Function::Max => "max",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Function::Min | Function::Max => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// Arithmetic negation: -x
    Negation,
    /// Logical not: !x
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Modulo,
    LogicalAnd,
    LogicalOr,
    Equality,
    Inequality,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Addition => "+",
            BinaryOperator::Subtraction => "-",
            BinaryOperator::Multiplication => "*",
            BinaryOperator::Division => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::LogicalAnd => "&&",
            BinaryOperator::LogicalOr => "||",
            BinaryOperator::Equality => "==",
            BinaryOperator::Inequality => "!=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::LessThan => "<",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::LessThanOrEqual => "<=",
        }
    }
}

/// A formula expression tree, built once when a robot profile is loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Boolean(bool),
    Variable(Variable),
    Unary {
        operator: UnaryOperator,
        operand: Box<Expr>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `cond ? a : b`. Only the selected branch is evaluated.
    Conditional {
        condition: Box<Expr>,
        true_branch: Box<Expr>,
        false_branch: Box<Expr>,
    },
    Call {
        function: Function,
        arguments: Vec<Expr>,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Boolean(b) => write!(f, "{}", b),
            Expr::Variable(v) => f.write_str(v.name()),
            Expr::Unary { operator, operand } => match operator {
                UnaryOperator::Negation => write!(f, "-{}", operand),
                UnaryOperator::LogicalNot => write!(f, "!{}", operand),
            },
            Expr::Binary { operator, left, right } => {
                write!(f, "({} {} {})", left, operator.symbol(), right)
            }
            Expr::Conditional { condition, true_branch, false_branch } => {
                write!(f, "({} ? {} : {})", condition, true_branch, false_branch)
            }
            Expr::Call { function, arguments } => {
                write!(f, "{}(", function.name())?;
                for (i, arg) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A parsed coupling formula together with the text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub source: String,
    pub expr: Expr,
}

impl Formula {
    /// Parse formula text. `file_id` tags errors for codespan rendering.
    pub fn parse(source: &str, file_id: usize) -> Result<Self, ParseError> {
        let expr = parse_formula(source, file_id)?;
        Ok(Formula {
            source: source.to_string(),
            expr,
        })
    }

    /// Whether the formula reads `variable` anywhere.
    pub fn references(&self, variable: Variable) -> bool {
        fn walk(expr: &Expr, variable: Variable) -> bool {
            match expr {
                Expr::Number(_) | Expr::Boolean(_) => false,
                Expr::Variable(v) => *v == variable,
                Expr::Unary { operand, .. } => walk(operand, variable),
                Expr::Binary { left, right, .. } => walk(left, variable) || walk(right, variable),
                Expr::Conditional { condition, true_branch, false_branch } => {
                    walk(condition, variable)
                        || walk(true_branch, variable)
                        || walk(false_branch, variable)
                }
                Expr::Call { arguments, .. } => arguments.iter().any(|a| walk(a, variable)),
            }
        }
        walk(&self.expr, variable)
    }

    /// Span covering the whole formula text.
    pub fn span(&self) -> Range<usize> {
        0..self.source.len()
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
