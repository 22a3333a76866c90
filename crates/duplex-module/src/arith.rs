//! `Arithmetic` — default `OperationHandler` implementation.
//!
//! Binary arithmetic over two `f64` operands. Every rule violation comes
//! back as a `DomainError`; a NaN or infinity never leaves this module as a
//! result.

use duplex_core::error::DomainError;
use duplex_core::handler::OperationHandler;
use duplex_core::message::{MathRequest, MathResponse};

use std::str::FromStr;

/// Supported operator symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        }
    }

    pub fn apply(self, lhs: f64, rhs: f64) -> Result<f64, DomainError> {
        if !lhs.is_finite() || !rhs.is_finite() {
            return Err(DomainError::NonFiniteResult);
        }
        let value = match self {
            Operator::Add => lhs + rhs,
            Operator::Sub => lhs - rhs,
            Operator::Mul => lhs * rhs,
            Operator::Div => {
                if rhs == 0.0 {
                    return Err(DomainError::DivisionByZero);
                }
                lhs / rhs
            }
        };
        // Overflow (e.g. f64::MAX * 2) lands here.
        if value.is_finite() {
            Ok(value)
        } else {
            Err(DomainError::NonFiniteResult)
        }
    }
}

impl FromStr for Operator {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Operator::Add),
            "-" => Ok(Operator::Sub),
            "*" => Ok(Operator::Mul),
            "/" => Ok(Operator::Div),
            other => Err(DomainError::UnknownOperator(other.to_string())),
        }
    }
}

/// The arithmetic handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Arithmetic;

impl OperationHandler for Arithmetic {
    fn compute(&self, request: &MathRequest) -> Result<MathResponse, DomainError> {
        let op: Operator = request.operation.parse()?;
        let result = op.apply(request.number1, request.number2)?;
        Ok(MathResponse { result })
    }
}
