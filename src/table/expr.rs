//! Row predicates and numeric formulas.
//!
//! This module is deliberately thin: numeric evaluation is delegated to the
//! `meval` crate, and what lives here is only the glue the planner-facing
//! query syntax needs — comparisons, `and`/`or` with parentheses, backticked
//! column names, and quoted string literals. Column references are resolved
//! against a concrete table at bind time, so a bad column name fails the
//! step before any row is touched.

use std::str::FromStr;

use crate::error::AppError;
use crate::table::{Cell, Table};

// ── Tokens ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(String),
    Cmp(CmpOp),
    Sym(char),
    LParen,
    RParen,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

fn tokenize(input: &str) -> Result<Vec<Tok>, AppError> {
    let mut toks = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '`' => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('`') => break,
                        Some(ch) => name.push(ch),
                        None => {
                            return Err(AppError::InvalidArgument {
                                message: "Unclosed backtick in expression".to_string(),
                            })
                        }
                    }
                }
                toks.push(Tok::Ident(name));
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => text.push(ch),
                        None => {
                            return Err(AppError::InvalidArgument {
                                message: "Unclosed string literal in expression".to_string(),
                            })
                        }
                    }
                }
                toks.push(Tok::Str(text));
            }
            '(' => {
                chars.next();
                toks.push(Tok::LParen);
            }
            ')' => {
                chars.next();
                toks.push(Tok::RParen);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Cmp(CmpOp::Eq));
                } else {
                    return Err(AppError::InvalidArgument {
                        message: "Use '==' for equality in expressions".to_string(),
                    });
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Cmp(CmpOp::Ne));
                } else {
                    return Err(AppError::InvalidArgument {
                        message: "Unexpected '!' in expression".to_string(),
                    });
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Cmp(CmpOp::Ge));
                } else {
                    toks.push(Tok::Cmp(CmpOp::Gt));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Cmp(CmpOp::Le));
                } else {
                    toks.push(Tok::Cmp(CmpOp::Lt));
                }
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                chars.next();
                toks.push(Tok::Sym(c));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut num = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() || ch == '.' {
                        num.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push(Tok::Num(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        word.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if word.eq_ignore_ascii_case("and") {
                    toks.push(Tok::And);
                } else if word.eq_ignore_ascii_case("or") {
                    toks.push(Tok::Or);
                } else {
                    toks.push(Tok::Ident(word));
                }
            }
            other => {
                return Err(AppError::InvalidArgument {
                    message: format!("Unexpected character '{other}' in expression"),
                })
            }
        }
    }
    Ok(toks)
}

// ── Predicate AST ───────────────────────────────────────────────

/// A parsed row predicate, unresolved against any particular table.
#[derive(Debug)]
pub struct Predicate {
    root: Node,
}

#[derive(Debug)]
enum Node {
    Or(Vec<Node>),
    And(Vec<Node>),
    Cmp {
        lhs: Vec<Tok>,
        op: CmpOp,
        rhs: Vec<Tok>,
    },
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn parse_or(&mut self) -> Result<Node, AppError> {
        let mut parts = vec![self.parse_and()?];
        while self.peek() == Some(&Tok::Or) {
            self.pos += 1;
            parts.push(self.parse_and()?);
        }
        if parts.len() == 1 {
            parts.pop().ok_or_else(|| AppError::InvalidArgument {
                message: "Empty expression".to_string(),
            })
        } else {
            Ok(Node::Or(parts))
        }
    }

    fn parse_and(&mut self) -> Result<Node, AppError> {
        let mut parts = vec![self.parse_primary()?];
        while self.peek() == Some(&Tok::And) {
            self.pos += 1;
            parts.push(self.parse_primary()?);
        }
        if parts.len() == 1 {
            parts.pop().ok_or_else(|| AppError::InvalidArgument {
                message: "Empty expression".to_string(),
            })
        } else {
            Ok(Node::And(parts))
        }
    }

    fn parse_primary(&mut self) -> Result<Node, AppError> {
        if self.peek() == Some(&Tok::LParen) && self.group_is_boolean() {
            self.pos += 1;
            let inner = self.parse_or()?;
            if self.peek() != Some(&Tok::RParen) {
                return Err(AppError::InvalidArgument {
                    message: "Expected ')' in expression".to_string(),
                });
            }
            self.pos += 1;
            return Ok(inner);
        }
        self.parse_comparison()
    }

    /// A '(' at a primary position opens either a boolean group or an
    /// arithmetic operand. Boolean groups contain a comparison or a boolean
    /// keyword somewhere inside; arithmetic groups never do.
    fn group_is_boolean(&self) -> bool {
        let mut depth = 0usize;
        for tok in self.toks.iter().skip(self.pos) {
            match tok {
                Tok::LParen => depth += 1,
                Tok::RParen => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return false;
                    }
                }
                Tok::Cmp(_) | Tok::And | Tok::Or => return true,
                _ => {}
            }
        }
        false
    }

    fn parse_comparison(&mut self) -> Result<Node, AppError> {
        let lhs = self.parse_operand_span()?;
        let op = match self.peek() {
            Some(Tok::Cmp(op)) => *op,
            _ => {
                return Err(AppError::InvalidArgument {
                    message: "Expected a comparison operator (==, !=, >, >=, <, <=)".to_string(),
                })
            }
        };
        self.pos += 1;
        let rhs = self.parse_operand_span()?;
        Ok(Node::Cmp { lhs, op, rhs })
    }

    /// Collect tokens up to the next top-level comparison or boolean keyword.
    fn parse_operand_span(&mut self) -> Result<Vec<Tok>, AppError> {
        let mut span = Vec::new();
        let mut depth = 0usize;
        while let Some(tok) = self.peek() {
            match tok {
                Tok::LParen => depth += 1,
                Tok::RParen => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                Tok::Cmp(_) | Tok::And | Tok::Or if depth == 0 => break,
                _ => {}
            }
            span.push(tok.clone());
            self.pos += 1;
        }
        if span.is_empty() {
            return Err(AppError::InvalidArgument {
                message: "Expected a value or column in expression".to_string(),
            });
        }
        Ok(span)
    }
}

impl Predicate {
    pub fn parse(input: &str) -> Result<Predicate, AppError> {
        let toks = tokenize(input)?;
        if toks.is_empty() {
            return Err(AppError::InvalidArgument {
                message: "Empty filter expression".to_string(),
            });
        }
        let mut parser = Parser { toks, pos: 0 };
        let root = parser.parse_or()?;
        if parser.pos != parser.toks.len() {
            return Err(AppError::InvalidArgument {
                message: "Trailing input after filter expression".to_string(),
            });
        }
        Ok(Predicate { root })
    }

    /// Resolve column references against a table and compile the numeric
    /// sides. Fails with `UnknownColumn` before any row is evaluated.
    pub fn bind(&self, table: &Table) -> Result<BoundPredicate, AppError> {
        bind_node(&self.root, table)
    }
}

fn bind_node(node: &Node, table: &Table) -> Result<BoundPredicate, AppError> {
    match node {
        Node::Or(parts) => Ok(BoundPredicate::Or(
            parts
                .iter()
                .map(|p| bind_node(p, table))
                .collect::<Result<_, _>>()?,
        )),
        Node::And(parts) => Ok(BoundPredicate::And(
            parts
                .iter()
                .map(|p| bind_node(p, table))
                .collect::<Result<_, _>>()?,
        )),
        Node::Cmp { lhs, op, rhs } => Ok(BoundPredicate::Cmp {
            lhs: bind_operand(lhs, table)?,
            op: *op,
            rhs: bind_operand(rhs, table)?,
        }),
    }
}

// ── Bound predicate ─────────────────────────────────────────────

#[derive(Debug)]
pub enum BoundPredicate {
    Or(Vec<BoundPredicate>),
    And(Vec<BoundPredicate>),
    Cmp {
        lhs: BoundOperand,
        op: CmpOp,
        rhs: BoundOperand,
    },
}

#[derive(Debug)]
pub enum BoundOperand {
    Text(String),
    Column(usize),
    Numeric(Formula),
}

fn bind_operand(span: &[Tok], table: &Table) -> Result<BoundOperand, AppError> {
    match span {
        [Tok::Str(s)] => Ok(BoundOperand::Text(s.clone())),
        [Tok::Ident(name)] => match table.column_index(name) {
            Some(idx) => Ok(BoundOperand::Column(idx)),
            None => Err(AppError::UnknownColumn {
                columns: vec![name.clone()],
            }),
        },
        [Tok::Num(raw)] => {
            let value = raw.parse::<f64>().map_err(|_| AppError::InvalidArgument {
                message: format!("Invalid number '{raw}' in expression"),
            })?;
            Ok(BoundOperand::Numeric(Formula::constant(value)))
        }
        _ => Ok(BoundOperand::Numeric(Formula::from_tokens(span, table)?)),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
}

fn cell_value(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Number(n) => Value::Number(*n),
        Cell::Text(s) => Value::Text(s.clone()),
        Cell::Bool(b) => Value::Bool(*b),
    }
}

fn compare(lhs: &Value, op: CmpOp, rhs: &Value) -> bool {
    use std::cmp::Ordering;
    // Missing values never satisfy a comparison, except that they are
    // unequal to everything.
    if matches!(lhs, Value::Null) || matches!(rhs, Value::Null) {
        return op == CmpOp::Ne;
    }
    let ord = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match ord {
        Some(ord) => match op {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
        },
        // Type mismatch: only != holds.
        None => op == CmpOp::Ne,
    }
}

impl BoundPredicate {
    pub fn eval_row(&self, row: &[Cell]) -> Result<bool, AppError> {
        match self {
            BoundPredicate::Or(parts) => {
                for p in parts {
                    if p.eval_row(row)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            BoundPredicate::And(parts) => {
                for p in parts {
                    if !p.eval_row(row)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            BoundPredicate::Cmp { lhs, op, rhs } => {
                let l = eval_operand(lhs, row)?;
                let r = eval_operand(rhs, row)?;
                Ok(compare(&l, *op, &r))
            }
        }
    }
}

fn eval_operand(operand: &BoundOperand, row: &[Cell]) -> Result<Value, AppError> {
    match operand {
        BoundOperand::Text(s) => Ok(Value::Text(s.clone())),
        BoundOperand::Column(idx) => Ok(cell_value(row.get(*idx).unwrap_or(&Cell::Null))),
        BoundOperand::Numeric(formula) => match formula.eval_row(row)? {
            Cell::Number(n) => Ok(Value::Number(n)),
            _ => Ok(Value::Null),
        },
    }
}

// ── Formulas ────────────────────────────────────────────────────

/// A numeric expression over table columns, compiled once per call and
/// evaluated per row. All arithmetic is meval's; this type only maps column
/// names to meval variables and feeds cell values in.
#[derive(Debug)]
pub struct Formula {
    expr: meval::Expr,
    /// (meval variable name, column index)
    vars: Vec<(String, usize)>,
}

impl Formula {
    /// Compile a formula string against a table. Column names may be bare
    /// identifiers or backtick-quoted when they contain spaces.
    pub fn compile(input: &str, table: &Table) -> Result<Formula, AppError> {
        let toks = tokenize(input)?;
        Formula::from_tokens(&toks, table)
    }

    fn constant(value: f64) -> Formula {
        // A bare number always parses.
        #[allow(clippy::unwrap_used)]
        let expr = meval::Expr::from_str(&format!("{value}")).unwrap();
        Formula {
            expr,
            vars: Vec::new(),
        }
    }

    fn from_tokens(span: &[Tok], table: &Table) -> Result<Formula, AppError> {
        let mut text = String::new();
        let mut vars: Vec<(String, usize)> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        let mut iter = span.iter().peekable();
        while let Some(tok) = iter.next() {
            match tok {
                Tok::Ident(name) => {
                    // An identifier directly followed by '(' is a function
                    // call (meval built-ins like abs, sqrt); pass through.
                    if iter.peek() == Some(&&Tok::LParen) {
                        text.push_str(name);
                    } else if let Some(idx) = table.column_index(name) {
                        let var = match vars.iter().find(|(_, i)| *i == idx) {
                            Some((v, _)) => v.clone(),
                            None => {
                                let v = format!("c{idx}");
                                vars.push((v.clone(), idx));
                                v
                            }
                        };
                        text.push_str(&var);
                    } else {
                        missing.push(name.clone());
                    }
                }
                Tok::Num(raw) => text.push_str(raw),
                Tok::Sym(c) => text.push(*c),
                Tok::LParen => text.push('('),
                Tok::RParen => text.push(')'),
                Tok::Str(_) => {
                    return Err(AppError::InvalidArgument {
                        message: "String literals are not allowed in numeric expressions"
                            .to_string(),
                    })
                }
                Tok::Cmp(_) | Tok::And | Tok::Or => {
                    return Err(AppError::InvalidArgument {
                        message: "Comparison inside a numeric expression".to_string(),
                    })
                }
            }
            text.push(' ');
        }
        if !missing.is_empty() {
            return Err(AppError::UnknownColumn { columns: missing });
        }
        let expr = meval::Expr::from_str(&text).map_err(|e| AppError::InvalidArgument {
            message: format!("Invalid expression: {e}"),
        })?;
        Ok(Formula { expr, vars })
    }

    /// Evaluate for one row. A referenced cell that is not numeric yields
    /// `Cell::Null` rather than failing the whole column.
    pub fn eval_row(&self, row: &[Cell]) -> Result<Cell, AppError> {
        let mut ctx = meval::Context::new();
        for (var, idx) in &self.vars {
            match row.get(*idx).and_then(Cell::as_number) {
                Some(n) => {
                    ctx.var(var.clone(), n);
                }
                None => return Ok(Cell::Null),
            }
        }
        match self.expr.eval_with_context(ctx) {
            Ok(n) if n.is_finite() => Ok(Cell::Number(n)),
            Ok(_) => Ok(Cell::Null),
            Err(e) => Err(AppError::Transform {
                message: format!("Expression evaluation failed: {e}"),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::table::Table;

    fn table() -> Table {
        let mut t = Table::new(vec![
            "Region".into(),
            "Profit".into(),
            "Units Sold".into(),
        ]);
        t.push_row(vec![
            Cell::Text("East".into()),
            Cell::Number(100.0),
            Cell::Number(10.0),
        ]);
        t.push_row(vec![
            Cell::Text("West".into()),
            Cell::Number(50.0),
            Cell::Number(120.0),
        ]);
        t
    }

    fn matches(query: &str, t: &Table) -> Vec<bool> {
        let bound = Predicate::parse(query).unwrap().bind(t).unwrap();
        t.rows().iter().map(|r| bound.eval_row(r).unwrap()).collect()
    }

    #[test]
    fn test_string_equality() {
        let t = table();
        assert_eq!(matches("Region == 'East'", &t), vec![true, false]);
    }

    #[test]
    fn test_numeric_comparison() {
        let t = table();
        assert_eq!(matches("Profit > 75", &t), vec![true, false]);
    }

    #[test]
    fn test_backticked_column_and_boolean_logic() {
        let t = table();
        assert_eq!(
            matches("Region == 'West' and `Units Sold` > 100", &t),
            vec![false, true]
        );
        assert_eq!(
            matches("(Profit > 75) or (`Units Sold` > 100)", &t),
            vec![true, true]
        );
    }

    #[test]
    fn test_arithmetic_rhs_is_delegated() {
        let t = table();
        // 100 + 2 * 10 = 120; only the strict-greater row fails
        assert_eq!(matches("`Units Sold` >= (100 + 2 * 10)", &t), vec![false, true]);
    }

    #[test]
    fn test_column_to_column_comparison() {
        let t = table();
        assert_eq!(matches("Profit > `Units Sold`", &t), vec![true, false]);
    }

    #[test]
    fn test_unknown_column_fails_bind() {
        let t = table();
        let err = Predicate::parse("Nope > 1").unwrap().bind(&t).unwrap_err();
        assert!(matches!(err, AppError::UnknownColumn { .. }));
    }

    #[test]
    fn test_formula_with_backticks() {
        let t = table();
        let f = Formula::compile("Profit / `Units Sold`", &t).unwrap();
        assert_eq!(f.eval_row(&t.rows()[0]).unwrap(), Cell::Number(10.0));
    }

    #[test]
    fn test_formula_non_numeric_cell_yields_null() {
        let t = table();
        let f = Formula::compile("Region + 1", &t);
        // Region resolves as a column; evaluation nulls out on text cells.
        let f = f.unwrap();
        assert_eq!(f.eval_row(&t.rows()[0]).unwrap(), Cell::Null);
    }

    #[test]
    fn test_unclosed_quote_is_invalid() {
        assert!(matches!(
            Predicate::parse("Region == 'East"),
            Err(AppError::InvalidArgument { .. })
        ));
    }
}
