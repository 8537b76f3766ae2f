//! Arithmetic question generation and answer checking.
//!
//! Pure aside from its RNG: no I/O, no shared state, deterministic once seeded.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

/// The default operand range used in production, `±10000`. Tests use a much
/// smaller range to keep expected values easy to reason about.
pub const DEFAULT_OPERAND_RANGE: i64 = 10_000;

const OPERATORS: [Operator; 5] = [
    Operator::Add,
    Operator::Sub,
    Operator::Mul,
    Operator::Div,
    Operator::Mod,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
        };
        write!(f, "{symbol}")
    }
}

/// A generated arithmetic question together with its known-correct answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Question {
    pub first_number: i64,
    pub operator: Operator,
    pub second_number: i64,
    pub answer: i64,
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{};{}", self.first_number, self.operator, self.second_number)
    }
}

/// Floor division: rounds toward negative infinity rather than toward zero.
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if (r != 0) && ((r < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Floor modulo: the result always carries the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        r + b
    } else {
        r
    }
}

/// Produces questions and checks submitted answers. The RNG is private so
/// two generators seeded identically produce identical sequences.
pub struct QuestionGenerator {
    rng: StdRng,
    operand_range: i64,
}

impl QuestionGenerator {
    /// A generator seeded from the OS entropy source, for production use.
    pub fn new(operand_range: i64) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            operand_range,
        }
    }

    /// A generator seeded deterministically, for tests.
    pub fn with_seed(seed: u64, operand_range: i64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            operand_range,
        }
    }

    pub fn generate(&mut self) -> Question {
        let range = self.operand_range;
        let first_number = self.rng.gen_range(-range..=range);
        let operator = OPERATORS[self.rng.gen_range(0..OPERATORS.len())];

        let second_number = match operator {
            Operator::Div | Operator::Mod => loop {
                let candidate = self.rng.gen_range(-range..=range);
                if candidate != 0 {
                    break candidate;
                }
            },
            _ => self.rng.gen_range(-range..=range),
        };

        let answer = match operator {
            Operator::Add => first_number + second_number,
            Operator::Sub => first_number - second_number,
            Operator::Mul => first_number * second_number,
            Operator::Div => floor_div(first_number, second_number),
            Operator::Mod => floor_mod(first_number, second_number),
        };

        Question {
            first_number,
            operator,
            second_number,
            answer,
        }
    }

    pub fn check(&self, question: &Question, submitted: i64) -> bool {
        question.answer == submitted
    }
}
