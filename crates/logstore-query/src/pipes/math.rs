//! `math` pipe.
//!
//! ```text
//! math expr1 [as] result1, expr2 [as] result2, ...
//! ```
//!
//! Expressions combine field values and numeric constants with the binary
//! operators below, listed from the tightest binding, unary minus and the
//! functions `abs`, `ceil`, `exp`, `floor`, `ln`, `max`, `min` and `round`.
//!
//! | priority | operators   |
//! |----------|-------------|
//! | 1        | `^`         |
//! | 2        | `*` `/` `%` |
//! | 3        | `+` `-`     |
//!
//! Field values which aren't numbers evaluate to `NaN`. Entries are evaluated
//! in order, so later entries can read the results of earlier ones.

use super::PipeProcessor;
use crate::block_result::{BlockResult, BlockResultColumn};
use crate::error::Result;
use crate::fields_set::FieldsSet;
use crate::lexer::Lexer;
use crate::parser::{parse_field_name, parse_math_number};
use crate::quote::{is_number_prefix, quote_token_if_needed};
use logstore_core::values::float64_string;
use logstore_core::get_canonical_column_name;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl MathOp {
    fn from_token(s: &str) -> Option<Self> {
        Some(match s {
            "+" => MathOp::Add,
            "-" => MathOp::Sub,
            "*" => MathOp::Mul,
            "/" => MathOp::Div,
            "%" => MathOp::Mod,
            "^" => MathOp::Pow,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MathOp::Add => "+",
            MathOp::Sub => "-",
            MathOp::Mul => "*",
            MathOp::Div => "/",
            MathOp::Mod => "%",
            MathOp::Pow => "^",
        }
    }

    /// Lower values bind tighter.
    fn priority(self) -> u8 {
        match self {
            MathOp::Pow => 1,
            MathOp::Mul | MathOp::Div | MathOp::Mod => 2,
            MathOp::Add | MathOp::Sub => 3,
        }
    }

    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            MathOp::Add => a + b,
            MathOp::Sub => a - b,
            MathOp::Mul => a * b,
            MathOp::Div => a / b,
            MathOp::Mod => a % b,
            MathOp::Pow => a.powf(b),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MathExprKind {
    /// A field value.
    Field(String),
    /// A constant together with its text form.
    Const { value: f64, repr: String },
    Binary {
        op: MathOp,
        left: Box<MathExpr>,
        right: Box<MathExpr>,
    },
    UnaryMinus(Box<MathExpr>),
    /// `abs`, `ceil`, `exp`, `floor`, `ln`, `max`, `min` or `round`.
    Func { name: &'static str, args: Vec<MathExpr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MathExpr {
    pub kind: MathExprKind,
    pub wrapped_in_parens: bool,
}

impl MathExpr {
    fn new(kind: MathExprKind) -> Self {
        Self {
            kind,
            wrapped_in_parens: false,
        }
    }

    fn binary_op(&self) -> Option<MathOp> {
        match &self.kind {
            MathExprKind::Binary { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// Appends `op right` to `left`, rotating the tree so tighter operators end up deeper.
    fn attach(left: MathExpr, op: MathOp, right: MathExpr) -> MathExpr {
        if !left.wrapped_in_parens {
            if let MathExprKind::Binary {
                op: left_op,
                left: ll,
                right: lr,
            } = left.kind
            {
                if left_op.priority() > op.priority() {
                    return MathExpr::new(MathExprKind::Binary {
                        op: left_op,
                        left: ll,
                        right: Box::new(Self::attach(*lr, op, right)),
                    });
                }
                let left = MathExpr::new(MathExprKind::Binary {
                    op: left_op,
                    left: ll,
                    right: lr,
                });
                return MathExpr::new(MathExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                });
            }
        }
        MathExpr::new(MathExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn add_fields(&self, needed: &mut FieldsSet) {
        match &self.kind {
            MathExprKind::Field(name) => needed.add(name),
            MathExprKind::Const { .. } => {}
            MathExprKind::Binary { left, right, .. } => {
                left.add_fields(needed);
                right.add_fields(needed);
            }
            MathExprKind::UnaryMinus(arg) => arg.add_fields(needed),
            MathExprKind::Func { args, .. } => args.iter().for_each(|a| a.add_fields(needed)),
        }
    }

    fn eval(&self, br: &BlockResult) -> Vec<f64> {
        let rows_len = br.rows_len();
        match &self.kind {
            MathExprKind::Field(name) => field_numbers(&br.column(name)),
            MathExprKind::Const { value, .. } => vec![*value; rows_len],
            MathExprKind::Binary { op, left, right } => {
                let a = left.eval(br);
                let b = right.eval(br);
                a.into_iter().zip(b).map(|(a, b)| op.apply(a, b)).collect()
            }
            MathExprKind::UnaryMinus(arg) => arg.eval(br).into_iter().map(|f| -f).collect(),
            MathExprKind::Func { name, args } => {
                let args: Vec<Vec<f64>> = args.iter().map(|a| a.eval(br)).collect();
                (0..rows_len).map(|i| eval_func(name, &args, i)).collect()
            }
        }
    }
}

fn field_numbers(c: &BlockResultColumn) -> Vec<f64> {
    if let Some(ts) = c.timestamps() {
        return ts.iter().map(|&t| t as f64).collect();
    }
    if let Some(v) = c.const_value() {
        return vec![parse_math_number(v).unwrap_or(f64::NAN); c.rows_len()];
    }
    let values = c.values();
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<(&str, f64)> = None;
    for v in values.iter().map(String::as_str) {
        let f = match prev {
            Some((pv, pf)) if pv == v => pf,
            _ => parse_math_number(v).unwrap_or(f64::NAN),
        };
        prev = Some((v, f));
        out.push(f);
    }
    out
}

fn eval_func(name: &str, args: &[Vec<f64>], i: usize) -> f64 {
    let x = args[0][i];
    match name {
        "abs" => x.abs(),
        "ceil" => x.ceil(),
        "exp" => x.exp(),
        "floor" => x.floor(),
        "ln" => x.ln(),
        "max" => args.iter().map(|a| a[i]).fold(f64::NAN, f64::max),
        "min" => args.iter().map(|a| a[i]).fold(f64::NAN, f64::min),
        "round" => match args.get(1) {
            Some(nearest) => round_to_nearest(x, nearest[i]),
            None => x.round(),
        },
        _ => panic!("BUG: unexpected math function {name:?}"),
    }
}

fn round_to_nearest(f: f64, nearest: f64) -> f64 {
    if nearest == 0.0 {
        return f;
    }
    (f / nearest).round() * nearest
}

impl fmt::Display for MathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MathExprKind::Field(name) => f.write_str(&quote_token_if_needed(name)),
            MathExprKind::Const { repr, .. } => f.write_str(repr),
            MathExprKind::Binary { op, left, right } => {
                if left.binary_op().is_some_and(|lop| lop.priority() > op.priority()) {
                    write!(f, "({left})")?;
                } else {
                    write!(f, "{left}")?;
                }
                write!(f, " {} ", op.as_str())?;
                if right.binary_op().is_some_and(|rop| rop.priority() >= op.priority()) {
                    write!(f, "({right})")
                } else {
                    write!(f, "{right}")
                }
            }
            MathExprKind::UnaryMinus(arg) => {
                if arg.binary_op().is_some() {
                    write!(f, "-({arg})")
                } else {
                    write!(f, "-{arg}")
                }
            }
            MathExprKind::Func { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{name}({})", args.join(", "))
            }
        }
    }
}

const MATH_FUNCS: &[(&str, usize, usize)] = &[
    ("abs", 1, 1),
    ("ceil", 1, 1),
    ("exp", 1, 1),
    ("floor", 1, 1),
    ("ln", 1, 1),
    ("max", 2, usize::MAX),
    ("min", 2, usize::MAX),
    ("round", 1, 2),
];

const MATH_STOP_TOKENS: &[&str] = &["=", "+", "-", "*", "/", "%", "^", ",", ")", "|", "!", ""];

fn parse_math_expr(lex: &mut Lexer<'_>) -> Result<MathExpr> {
    let mut left = parse_math_operand(lex)?;
    loop {
        let Some(op) = MathOp::from_token(&lex.token).filter(|_| !lex.is_quoted_token()) else {
            return Ok(left);
        };
        lex.next_token();
        let right = parse_math_operand(lex)
            .map_err(|err| lex.error(format!("cannot parse operand after [{left} {}]: {err}", op.as_str())))?;
        left = MathExpr::attach(left, op, right);
    }
}

fn parse_math_operand(lex: &mut Lexer<'_>) -> Result<MathExpr> {
    if lex.is_keyword(&["("]) {
        lex.next_token();
        let mut me = parse_math_expr(lex)?;
        if !lex.is_keyword(&[")"]) {
            return Err(lex.error(format!("missing ')'; got {:?} instead", lex.token)));
        }
        lex.next_token();
        me.wrapped_in_parens = true;
        return Ok(me);
    }
    if lex.is_keyword(&["-"]) {
        lex.next_token();
        let arg = parse_math_operand(lex)?;
        return Ok(MathExpr::new(MathExprKind::UnaryMinus(Box::new(arg))));
    }
    if lex.is_keyword(&["+"]) {
        lex.next_token();
        return parse_math_operand(lex);
    }
    if !lex.is_quoted_token() {
        let lower = lex.token.to_lowercase();
        if let Some(&(name, min_args, max_args)) = MATH_FUNCS.iter().find(|(name, _, _)| *name == lower) {
            return parse_math_func(lex, name, min_args, max_args);
        }
        if is_number_prefix(&lex.token) {
            let repr = lex.next_compound_token_ext(MATH_STOP_TOKENS)?;
            let value = parse_math_number(&repr).ok_or_else(|| lex.error(format!("cannot parse {repr:?} as a number")))?;
            return Ok(MathExpr::new(MathExprKind::Const { value, repr }));
        }
    }
    if lex.is_keyword(&[",", "(", ")", "|", "*", "/", "%", "^", ""]) {
        return Err(lex.error(format!("unexpected token {:?}; want a field name or a number", lex.token)));
    }
    let name = lex.next_compound_token_ext(MATH_STOP_TOKENS)?;
    Ok(MathExpr::new(MathExprKind::Field(
        get_canonical_column_name(&name).to_string(),
    )))
}

fn parse_math_func(lex: &mut Lexer<'_>, name: &'static str, min_args: usize, max_args: usize) -> Result<MathExpr> {
    lex.next_token();
    if !lex.is_keyword(&["("]) {
        return Err(lex.error(format!("missing '(' after '{name}'")));
    }
    lex.next_token();
    let mut args = Vec::new();
    while !lex.is_keyword(&[")"]) {
        args.push(parse_math_expr(lex)?);
        if lex.is_keyword(&[","]) {
            lex.next_token();
        } else if !lex.is_keyword(&[")"]) {
            return Err(lex.error(format!("unexpected token {:?} in '{name}' args; want ',' or ')'", lex.token)));
        }
    }
    lex.next_token();
    if args.len() < min_args || args.len() > max_args {
        return Err(lex.error(format!("unexpected number of args for '{name}': {}", args.len())));
    }
    Ok(MathExpr::new(MathExprKind::Func { name, args }))
}

#[derive(Debug, Clone, PartialEq)]
pub struct MathEntry {
    pub expr: MathExpr,
    pub result_field: String,
}

impl fmt::Display for MathEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expr.binary_op().is_some() {
            write!(f, "({})", self.expr)?;
        } else {
            write!(f, "{}", self.expr)?;
        }
        write!(f, " as {}", quote_token_if_needed(&self.result_field))
    }
}

/// `math expr [as] result, ...`
#[derive(Debug, Clone)]
pub struct PipeMath {
    pub entries: Vec<MathEntry>,
}

impl PipeMath {
    pub(crate) fn parse(lex: &mut Lexer<'_>) -> Result<Self> {
        lex.next_token();
        let mut entries = Vec::new();
        loop {
            let expr = parse_math_expr(lex)?;
            let result_field = if lex.is_keyword(&[",", "|", ")", ""]) {
                expr.to_string()
            } else {
                if lex.is_keyword(&["as"]) {
                    lex.next_token();
                }
                parse_field_name(lex)?
            };
            entries.push(MathEntry { expr, result_field });

            if lex.is_keyword(&[","]) {
                lex.next_token();
                continue;
            }
            if lex.is_keyword(&["|", ")", ""]) {
                return Ok(Self { entries });
            }
            return Err(lex.error(format!(
                "unexpected token after 'math' expression [{}]: {:?}; want ',', '|' or ')'",
                entries[entries.len() - 1],
                lex.token
            )));
        }
    }

    pub(crate) fn update_needed_fields(&self, needed: &mut FieldsSet) {
        for e in self.entries.iter().rev() {
            if needed.contains(&e.result_field) {
                needed.remove(&e.result_field);
                e.expr.add_fields(needed);
            }
        }
    }

    pub(crate) fn new_processor(&self, next: Arc<dyn PipeProcessor>) -> Arc<dyn PipeProcessor> {
        Arc::new(MathProcessor {
            pipe: self.clone(),
            next,
        })
    }
}

impl fmt::Display for PipeMath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self.entries.iter().map(|e| e.to_string()).collect();
        write!(f, "math {}", entries.join(", "))
    }
}

struct MathProcessor {
    pipe: PipeMath,
    next: Arc<dyn PipeProcessor>,
}

impl PipeProcessor for MathProcessor {
    fn write_block(&self, worker_id: usize, mut br: BlockResult) {
        if br.is_empty() {
            return;
        }
        for e in &self.pipe.entries {
            let values = e.expr.eval(&br).into_iter().map(float64_string).collect();
            br.add_result_column(e.result_field.clone(), values);
        }
        self.next.write_block(worker_id, br);
    }

    fn flush(&self) -> Result<()> {
        self.next.flush()
    }
}

#[cfg(test)]
mod tests {
    use crate::fields_set::FieldsSet;
    use crate::parser::parse_query;
    use crate::pipes::test_utils::*;
    use crate::pipes::Pipe;

    fn check(s: &str, want: &str) {
        let q = parse_query(s).unwrap_or_else(|err| panic!("cannot parse {s:?}: {err}"));
        assert_eq!(q.to_string(), want);
        let q2 = parse_query(want).unwrap_or_else(|err| panic!("cannot reparse {want:?}: {err}"));
        assert_eq!(q2.to_string(), want);
    }

    #[test]
    fn test_parse_math() {
        check("* | math a", "* | math a as a");
        check("* | math a + b * c as x", "* | math (a + b * c) as x");
        check("* | math (a + b) * c x", "* | math ((a + b) * c) as x");
        check("* | math a + b * c ^ d as x", "* | math (a + b * c ^ d) as x");
        check("* | math a - (b - c) as x", "* | math (a - (b - c)) as x");
        check("* | math -(a + 1) as x, max(a, b, 3) as y", "* | math -(a + 1) as x, max(a, b, 3) as y");
        check("* | math round(a, 0.5) as r", "* | math round(a, 0.5) as r");
        check("* | math 1KiB * 2 as r", "* | math (1KiB * 2) as r");
        check("* | math a+1", "* | math (a + 1) as \"a + 1\"");

        assert!(parse_query("* | math").is_err());
        assert!(parse_query("* | math abs(a, b) as x").is_err());
        assert!(parse_query("* | math max(a) as x").is_err());
        assert!(parse_query("* | math a + | fields a").is_err());
    }

    #[test]
    fn test_math_priorities() {
        let q = parse_query("* | math a + b * c ^ d as x").unwrap();
        let Pipe::Math(pm) = &q.pipes[0] else {
            panic!("expecting math pipe");
        };
        let br = block(&[("a", &["1"]), ("b", &["2"]), ("c", &["3"]), ("d", &["2"])]);
        let rows = run_pipes(&q.to_string(), 1, vec![br]).unwrap();
        assert_eq!(rows[0].last().unwrap(), &("x".to_string(), "19".to_string()));
        assert_eq!(pm.entries.len(), 1);
    }

    #[test]
    fn test_math_eval() {
        let br = block(&[("a", &["10", "7", "foo"]), ("b", &["4", "2", "1"])]);
        let q = "* | math a % b as m, a / b as d, -a as n, min(a, b) as lo, round(a / 3) as r, m * 2 as m2 | fields m, d, n, lo, r, m2";
        let rows = run_pipes(q, 1, vec![br]).unwrap();
        assert_eq!(
            rows,
            vec![
                row(&[("m", "2"), ("d", "2.5"), ("n", "-10"), ("lo", "4"), ("r", "3"), ("m2", "4")]),
                row(&[("m", "1"), ("d", "3.5"), ("n", "-7"), ("lo", "2"), ("r", "2"), ("m2", "2")]),
                row(&[("m", "NaN"), ("d", "NaN"), ("n", "NaN"), ("lo", "1"), ("r", "NaN"), ("m2", "NaN")]),
            ]
        );
    }

    #[test]
    fn test_math_needed_fields() {
        let q = parse_query("* | math a + b as c, c * 2 as d | fields d").unwrap();
        let mut needed = FieldsSet::all();
        for p in q.pipes.iter().rev() {
            p.update_needed_fields(&mut needed);
        }
        let mut got = needed.to_patterns();
        got.sort();
        assert_eq!(got, vec!["a", "b"]);
    }
}
