//!
//! SQL frontend: byte-wise lexer and recursive-descent parser for
//! SELECT / INSERT / UPDATE / DELETE. Keywords are case-insensitive;
//! string literals use `''` as the escape for a literal apostrophe.
//!
//! The WHERE clause is captured as a raw source slice; the optimizer
//! decomposes it into conjuncts with [`parse_conditions`].

use crate::err::{Error, Result};
use crate::query::*;
use crate::value::Value;
use std::str;

/// Parsing token.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Token {
    Id,
    Number,
    FloatNumber,
    StringLit,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Plus,
    Minus,
    Times,
    Divide,
    LBra,
    RBra,
    Comma,
    Dot,
    Semicolon,
    Unknown,
    EndOfFile,
}

impl Token {
    fn describe(self) -> &'static str {
        match self {
            Token::Id => "identifier",
            Token::Number | Token::FloatNumber => "number",
            Token::StringLit => "string",
            Token::Equal => "=",
            Token::NotEqual => "<>",
            Token::Less => "<",
            Token::LessEqual => "<=",
            Token::Greater => ">",
            Token::GreaterEqual => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Times => "*",
            Token::Divide => "/",
            Token::LBra => "(",
            Token::RBra => ")",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Semicolon => ";",
            Token::Unknown => "unknown token",
            Token::EndOfFile => "end of input",
        }
    }
}

/// Byte-wise tokenizer.
///
/// Name convention for parser methods: s_ parses a statement.
pub struct Lexer<'a> {
    /// Source SQL.
    source: &'a [u8],
    /// Index into source.
    source_ix: usize,
    /// Current input byte, 0 at end.
    cc: u8,
    /// Current token.
    pub token: Token,
    /// Source index of the start of the current token.
    pub token_start: usize,
    /// Source slice for the current token ( string literals are in ts ).
    cs: &'a [u8],
    /// Decoded string literal.
    ts: String,
    /// Decoded integer literal.
    decimal_int: i64,
    /// Decoded float literal.
    decimal_float: f64,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Result<Lexer<'a>> {
        let source = src.as_bytes();
        let mut lex = Lexer {
            source,
            source_ix: 0,
            cc: 0,
            token: Token::EndOfFile,
            token_start: 0,
            cs: source,
            ts: String::new(),
            decimal_int: 0,
            decimal_float: 0.0,
        };
        lex.read_char();
        lex.read_token()?;
        Ok(lex)
    }

    fn read_char(&mut self) -> u8 {
        let cc = if self.source_ix >= self.source.len() {
            self.source_ix = self.source.len() + 1;
            0
        } else {
            let cc = self.source[self.source_ix];
            self.source_ix += 1;
            cc
        };
        self.cc = cc;
        cc
    }

    /// Read the next token.
    pub fn read_token(&mut self) -> Result<()> {
        let mut cc = self.cc;
        while cc == b' ' || cc == b'\n' || cc == b'\r' || cc == b'\t' {
            cc = self.read_char();
        }
        self.token_start = self.source_ix.saturating_sub(1);
        if cc == 0 {
            self.token = Token::EndOfFile;
            return Ok(());
        }
        let sc = cc;
        cc = self.read_char();
        self.token = match sc {
            b'A'..=b'Z' | b'a'..=b'z' | b'_' | b'@' => {
                while cc.is_ascii_alphanumeric() || cc == b'_' {
                    cc = self.read_char();
                }
                self.cs = &self.source[self.token_start..self.source_ix - 1];
                Token::Id
            }
            b'0'..=b'9' => {
                while cc.is_ascii_digit() {
                    cc = self.read_char();
                }
                if cc == b'.' {
                    self.read_char();
                    while self.cc.is_ascii_digit() {
                        self.read_char();
                    }
                    let s = str::from_utf8(&self.source[self.token_start..self.source_ix - 1])
                        .expect("digits are ASCII");
                    self.decimal_float = s.parse().map_err(|_| self.bad_number(s))?;
                    Token::FloatNumber
                } else {
                    let s = str::from_utf8(&self.source[self.token_start..self.source_ix - 1])
                        .expect("digits are ASCII");
                    self.decimal_int = s.parse().map_err(|_| self.bad_number(s))?;
                    Token::Number
                }
            }
            b'\'' => {
                self.ts = String::new();
                let mut start = self.source_ix - 1;
                loop {
                    if cc == 0 {
                        return Err(Error::Syntax {
                            pos: self.token_start,
                            expected: "closing quote".to_string(),
                            found: "end of input".to_string(),
                        });
                    }
                    if cc == b'\'' {
                        cc = self.read_char();
                        if cc != b'\'' {
                            break;
                        }
                        // '' escapes a literal apostrophe.
                        self.ts.push_str(
                            str::from_utf8(&self.source[start..self.source_ix - 1])
                                .unwrap_or_default(),
                        );
                        start = self.source_ix;
                    }
                    cc = self.read_char();
                }
                self.ts.push_str(
                    str::from_utf8(&self.source[start..self.source_ix - 2]).unwrap_or_default(),
                );
                Token::StringLit
            }
            b'=' => Token::Equal,
            b'<' => {
                if cc == b'=' {
                    self.read_char();
                    Token::LessEqual
                } else if cc == b'>' {
                    self.read_char();
                    Token::NotEqual
                } else {
                    Token::Less
                }
            }
            b'>' => {
                if cc == b'=' {
                    self.read_char();
                    Token::GreaterEqual
                } else {
                    Token::Greater
                }
            }
            b'!' => {
                if cc == b'=' {
                    self.read_char();
                    Token::NotEqual
                } else {
                    Token::Unknown
                }
            }
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Times,
            b'/' => Token::Divide,
            b'(' => Token::LBra,
            b')' => Token::RBra,
            b',' => Token::Comma,
            b'.' => Token::Dot,
            b';' => Token::Semicolon,
            _ => Token::Unknown,
        };
        Ok(())
    }

    fn bad_number(&self, s: &str) -> Error {
        Error::Syntax {
            pos: self.token_start,
            expected: "number".to_string(),
            found: s.to_string(),
        }
    }

    /// Current token as shown in error messages.
    fn found(&self) -> String {
        match self.token {
            Token::Id => format!("'{}'", String::from_utf8_lossy(self.cs)),
            Token::Number => self.decimal_int.to_string(),
            Token::FloatNumber => self.decimal_float.to_string(),
            Token::StringLit => format!("'{}'", self.ts),
            other => other.describe().to_string(),
        }
    }
}

/// SQL parser over the lexer.
pub struct Parser<'a> {
    lex: Lexer<'a>,
}

/// Parse one statement.
pub fn parse(sql: &str) -> Result<Statement> {
    let mut p = Parser {
        lex: Lexer::new(sql)?,
    };
    let stmt = p.statement()?;
    if p.lex.token == Token::Semicolon {
        p.lex.read_token()?;
    }
    p.expect_end()?;
    Ok(stmt)
}

/// Parse a WHERE clause body into its conjuncts.
pub fn parse_conditions(raw: &str) -> Result<Vec<Condition>> {
    let mut p = Parser {
        lex: Lexer::new(raw)?,
    };
    let conds = p.conjunction()?;
    p.expect_end()?;
    Ok(conds)
}

impl<'a> Parser<'a> {
    fn statement(&mut self) -> Result<Statement> {
        if self.lex.token == Token::Id {
            let kw = self.keyword();
            match kw.as_str() {
                "SELECT" => return self.s_select(),
                "INSERT" => return self.s_insert(),
                "UPDATE" => return self.s_update(),
                "DELETE" => return self.s_delete(),
                "CREATE" | "DROP" | "ALTER" | "BEGIN" | "COMMIT" | "ROLLBACK" => {
                    return Err(Error::Unsupported(format!("{} statement", kw)))
                }
                _ => {}
            }
        }
        Err(self.expected("statement keyword"))
    }

    // SELECT <cols|*> FROM <tables> [JOIN ...]* [WHERE ...]
    //   [GROUP BY ...] [ORDER BY ... [ASC|DESC]]
    fn s_select(&mut self) -> Result<Statement> {
        Ok(Statement::Select(self.select_body()?))
    }

    fn select_body(&mut self) -> Result<SelectQuery> {
        self.read_keyword("SELECT")?;
        let mut q = SelectQuery::default();
        if self.lex.token == Token::Times {
            self.lex.read_token()?;
        } else {
            loop {
                q.columns.push(self.qualified_name()?);
                if !self.test(Token::Comma)? {
                    break;
                }
            }
        }
        self.read_keyword("FROM")?;
        loop {
            q.tables.push(self.name()?);
            if !self.test(Token::Comma)? {
                break;
            }
        }
        loop {
            let join_type = if self.test_keyword("JOIN")? {
                JoinType::Inner
            } else if self.test_keyword("INNER")? {
                self.read_keyword("JOIN")?;
                JoinType::Inner
            } else if self.test_keyword("LEFT")? {
                self.test_keyword("OUTER")?;
                self.read_keyword("JOIN")?;
                JoinType::Left
            } else if self.test_keyword("RIGHT")? {
                self.test_keyword("OUTER")?;
                self.read_keyword("JOIN")?;
                JoinType::Right
            } else if self.test_keyword("FULL")? {
                self.test_keyword("OUTER")?;
                self.read_keyword("JOIN")?;
                JoinType::Full
            } else if self.test_keyword("CROSS")? {
                self.read_keyword("JOIN")?;
                JoinType::Cross
            } else {
                break;
            };
            let table = self.name()?;
            let (left_col, right_col) = if join_type == JoinType::Cross {
                (String::new(), String::new())
            } else {
                self.read_keyword("ON")?;
                let l = self.qualified_name()?;
                self.read(Token::Equal)?;
                let r = self.qualified_name()?;
                (l, r)
            };
            q.joins.push(JoinClause {
                table,
                join_type,
                left_col,
                right_col,
            });
        }
        if self.test_keyword("WHERE")? {
            q.where_raw = Some(self.capture_where()?);
        }
        if self.test_keyword("GROUP")? {
            self.read_keyword("BY")?;
            loop {
                q.group_by.push(self.qualified_name()?);
                if !self.test(Token::Comma)? {
                    break;
                }
            }
        }
        if self.test_keyword("ORDER")? {
            self.read_keyword("BY")?;
            loop {
                let col = self.qualified_name()?;
                let asc = if self.test_keyword("DESC")? {
                    false
                } else {
                    self.test_keyword("ASC")?;
                    true
                };
                q.order_by.push((col, asc));
                if !self.test(Token::Comma)? {
                    break;
                }
            }
        }
        Ok(q)
    }

    /// Capture the WHERE clause as raw text, stopping before GROUP,
    /// ORDER, a closing bracket or the end of the statement.
    fn capture_where(&mut self) -> Result<String> {
        let start = self.lex.token_start;
        let mut end = self.lex.source.len();
        loop {
            match self.lex.token {
                Token::EndOfFile => break,
                Token::Semicolon | Token::RBra => {
                    end = self.lex.token_start;
                    break;
                }
                Token::Id => {
                    let kw = self.keyword();
                    if kw == "GROUP" || kw == "ORDER" {
                        end = self.lex.token_start;
                        break;
                    }
                    self.lex.read_token()?;
                }
                _ => self.lex.read_token()?,
            }
        }
        let raw = str::from_utf8(&self.lex.source[start..end])
            .unwrap_or_default()
            .trim()
            .to_string();
        if raw.is_empty() {
            return Err(self.expected("condition"));
        }
        Ok(raw)
    }

    // INSERT INTO t [(cols)] VALUES (...)[, ...] | SELECT ...
    fn s_insert(&mut self) -> Result<Statement> {
        self.read_keyword("INSERT")?;
        self.read_keyword("INTO")?;
        let table = self.name()?;
        let mut columns = Vec::new();
        if self.test(Token::LBra)? {
            loop {
                columns.push(self.name()?);
                if !self.test(Token::Comma)? {
                    break;
                }
            }
            self.read(Token::RBra)?;
        }
        if self.lex.token == Token::Id && self.keyword() == "SELECT" {
            let select = self.select_body()?;
            return Ok(Statement::Insert(InsertQuery {
                table,
                columns,
                rows: Vec::new(),
                select: Some(Box::new(select)),
            }));
        }
        self.read_keyword("VALUES")?;
        let mut rows = Vec::new();
        loop {
            self.read(Token::LBra)?;
            let mut row = Vec::new();
            loop {
                row.push(self.literal()?);
                if !self.test(Token::Comma)? {
                    break;
                }
            }
            self.read(Token::RBra)?;
            rows.push(row);
            if !self.test(Token::Comma)? {
                break;
            }
        }
        Ok(Statement::Insert(InsertQuery {
            table,
            columns,
            rows,
            select: None,
        }))
    }

    // UPDATE t SET col = expr[, ...] [WHERE ...]
    fn s_update(&mut self) -> Result<Statement> {
        self.read_keyword("UPDATE")?;
        let table = self.name()?;
        self.read_keyword("SET")?;
        let mut sets = Vec::new();
        loop {
            let col = self.name()?;
            self.read(Token::Equal)?;
            sets.push((col, self.set_expr()?));
            if !self.test(Token::Comma)? {
                break;
            }
        }
        let where_raw = if self.test_keyword("WHERE")? {
            Some(self.capture_where()?)
        } else {
            None
        };
        Ok(Statement::Update(UpdateQuery {
            table,
            sets,
            where_raw,
        }))
    }

    /// Right side of `SET col =`: a literal, a column, or
    /// `column op literal` arithmetic.
    fn set_expr(&mut self) -> Result<SetExpr> {
        if self.lex.token == Token::Id {
            let col = self.qualified_name()?;
            let op = match self.lex.token {
                Token::Plus => ArithOp::Add,
                Token::Minus => ArithOp::Sub,
                Token::Times => ArithOp::Mul,
                Token::Divide => ArithOp::Div,
                _ => return Ok(SetExpr::Column(col)),
            };
            self.lex.read_token()?;
            let val = self.literal()?;
            Ok(SetExpr::Arith(col, op, val))
        } else {
            Ok(SetExpr::Literal(self.literal()?))
        }
    }

    // DELETE FROM t [WHERE ...]
    fn s_delete(&mut self) -> Result<Statement> {
        self.read_keyword("DELETE")?;
        self.read_keyword("FROM")?;
        let table = self.name()?;
        let where_raw = if self.test_keyword("WHERE")? {
            Some(self.capture_where()?)
        } else {
            None
        };
        Ok(Statement::Delete(DeleteQuery { table, where_raw }))
    }

    /// condition [AND condition]*
    fn conjunction(&mut self) -> Result<Vec<Condition>> {
        let mut conds = Vec::new();
        loop {
            let left = self.operand()?;
            let op = self.cmp_op()?;
            let right = self.operand()?;
            conds.push(Condition::new(left, op, right));
            if !self.test_keyword("AND")? {
                break;
            }
        }
        Ok(conds)
    }

    fn operand(&mut self) -> Result<Operand> {
        if self.lex.token == Token::Id {
            Ok(Operand::Column(self.qualified_name()?))
        } else {
            Ok(Operand::Literal(self.literal()?))
        }
    }

    fn cmp_op(&mut self) -> Result<CmpOp> {
        let op = match self.lex.token {
            Token::Equal => CmpOp::Eq,
            Token::NotEqual => CmpOp::Ne,
            Token::Less => CmpOp::Lt,
            Token::LessEqual => CmpOp::Le,
            Token::Greater => CmpOp::Gt,
            Token::GreaterEqual => CmpOp::Ge,
            _ => return Err(self.expected("comparison operator")),
        };
        self.lex.read_token()?;
        Ok(op)
    }

    /// Literal value: number, float, string, or a signed number.
    fn literal(&mut self) -> Result<Value> {
        let negate = self.test(Token::Minus)?;
        let val = match self.lex.token {
            Token::Number => {
                let x = self.lex.decimal_int;
                let x = if negate { -x } else { x };
                Value::Int(x as i32)
            }
            Token::FloatNumber => {
                let x = self.lex.decimal_float;
                let x = if negate { -x } else { x };
                Value::Float(x as f32)
            }
            Token::StringLit if !negate => Value::Str(self.lex.ts.clone()),
            _ => return Err(self.expected("literal value")),
        };
        self.lex.read_token()?;
        Ok(val)
    }

    /// Bare identifier; reserved keywords do not qualify.
    fn name(&mut self) -> Result<String> {
        const RESERVED: &[&str] = &[
            "SELECT", "FROM", "WHERE", "GROUP", "ORDER", "BY", "JOIN", "ON", "INSERT", "INTO",
            "VALUES", "UPDATE", "SET", "DELETE", "AND", "ASC", "DESC", "INNER", "LEFT", "RIGHT",
            "FULL", "OUTER", "CROSS",
        ];
        if self.lex.token != Token::Id || RESERVED.contains(&self.keyword().as_str()) {
            return Err(self.expected("identifier"));
        }
        let s = String::from_utf8_lossy(self.lex.cs).into_owned();
        self.lex.read_token()?;
        Ok(s)
    }

    /// `id` or `id.id`.
    fn qualified_name(&mut self) -> Result<String> {
        let mut s = self.name()?;
        if self.test(Token::Dot)? {
            s.push('.');
            s.push_str(&self.name()?);
        }
        Ok(s)
    }

    /// Uppercased form of the current Id token.
    fn keyword(&self) -> String {
        String::from_utf8_lossy(self.lex.cs).to_ascii_uppercase()
    }

    /// Consume the token if it matches.
    fn test(&mut self, t: Token) -> Result<bool> {
        if self.lex.token == t {
            self.lex.read_token()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Consume the keyword if the current token is it.
    fn test_keyword(&mut self, kw: &str) -> Result<bool> {
        if self.lex.token == Token::Id && self.keyword() == kw {
            self.lex.read_token()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn read(&mut self, t: Token) -> Result<()> {
        if self.lex.token == t {
            self.lex.read_token()?;
            Ok(())
        } else {
            Err(self.expected(t.describe()))
        }
    }

    fn read_keyword(&mut self, kw: &str) -> Result<()> {
        if self.test_keyword(kw)? {
            Ok(())
        } else {
            Err(self.expected(kw))
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        if self.lex.token == Token::EndOfFile {
            Ok(())
        } else {
            Err(self.expected("end of statement"))
        }
    }

    fn expected(&self, what: &str) -> Error {
        Error::Syntax {
            pos: self.lex.token_start,
            expected: what.to_string(),
            found: self.lex.found(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_star() {
        let s = parse("SELECT * FROM students").unwrap();
        match s {
            Statement::Select(q) => {
                assert!(q.columns.is_empty());
                assert_eq!(q.tables, vec!["students"]);
                assert!(q.where_raw.is_none());
            }
            _ => panic!("not a select"),
        }
    }

    #[test]
    fn select_full_shape() {
        let s = parse(
            "select e.name, d.name from employees e_ignored, departments \
             where e.dept = 3 and e.age > 30 group by d.name order by e.name desc",
        );
        // Aliases are not supported: the second identifier breaks the
        // FROM list and parsing fails cleanly.
        assert!(s.is_err());

        let s = parse(
            "SELECT employees.name FROM employees JOIN departments \
             ON employees.dept = departments.id WHERE employees.age >= 30 \
             ORDER BY employees.name",
        )
        .unwrap();
        match s {
            Statement::Select(q) => {
                assert_eq!(q.columns, vec!["employees.name"]);
                assert_eq!(q.joins.len(), 1);
                assert_eq!(q.joins[0].table, "departments");
                assert_eq!(q.joins[0].join_type, JoinType::Inner);
                assert_eq!(q.joins[0].left_col, "employees.dept");
                assert_eq!(q.where_raw.as_deref(), Some("employees.age >= 30"));
                assert_eq!(q.order_by, vec![("employees.name".to_string(), true)]);
            }
            _ => panic!("not a select"),
        }
    }

    #[test]
    fn join_variants() {
        for (sql, jt) in [
            ("LEFT JOIN", JoinType::Left),
            ("LEFT OUTER JOIN", JoinType::Left),
            ("RIGHT JOIN", JoinType::Right),
            ("FULL OUTER JOIN", JoinType::Full),
            ("INNER JOIN", JoinType::Inner),
        ] {
            let s = parse(&format!(
                "SELECT * FROM a {} b ON a.x = b.y",
                sql
            ))
            .unwrap();
            match s {
                Statement::Select(q) => assert_eq!(q.joins[0].join_type, jt),
                _ => panic!(),
            }
        }
        let s = parse("SELECT * FROM a CROSS JOIN b").unwrap();
        match s {
            Statement::Select(q) => {
                assert_eq!(q.joins[0].join_type, JoinType::Cross);
                assert!(q.joins[0].left_col.is_empty());
            }
            _ => panic!(),
        }
    }

    #[test]
    fn insert_forms() {
        let s = parse("INSERT INTO students VALUES (1, 'Alice', 3.5)").unwrap();
        match s {
            Statement::Insert(q) => {
                assert_eq!(q.table, "students");
                assert!(q.columns.is_empty());
                assert_eq!(
                    q.rows,
                    vec![vec![
                        Value::Int(1),
                        Value::Str("Alice".into()),
                        Value::Float(3.5)
                    ]]
                );
            }
            _ => panic!(),
        }
        let s = parse("INSERT INTO t (a, b) VALUES (1, 2), (3, 4)").unwrap();
        match s {
            Statement::Insert(q) => {
                assert_eq!(q.columns, vec!["a", "b"]);
                assert_eq!(q.rows.len(), 2);
            }
            _ => panic!(),
        }
        let s = parse("INSERT INTO t SELECT * FROM u WHERE x = 1").unwrap();
        match s {
            Statement::Insert(q) => {
                let sel = q.select.unwrap();
                assert_eq!(sel.tables, vec!["u"]);
                assert_eq!(sel.where_raw.as_deref(), Some("x = 1"));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn update_and_delete() {
        let s = parse("UPDATE accounts SET bal = bal - 100, touched = 1 WHERE id = 7").unwrap();
        match s {
            Statement::Update(q) => {
                assert_eq!(q.table, "accounts");
                assert_eq!(
                    q.sets[0],
                    (
                        "bal".to_string(),
                        SetExpr::Arith("bal".into(), ArithOp::Sub, Value::Int(100))
                    )
                );
                assert_eq!(q.sets[1], ("touched".to_string(), SetExpr::Literal(Value::Int(1))));
                assert_eq!(q.where_raw.as_deref(), Some("id = 7"));
            }
            _ => panic!(),
        }
        let s = parse("DELETE FROM students WHERE gpa < 2.0").unwrap();
        match s {
            Statement::Delete(q) => {
                assert_eq!(q.table, "students");
                assert_eq!(q.where_raw.as_deref(), Some("gpa < 2.0"));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn string_escapes() {
        let s = parse("INSERT INTO t VALUES ('O''Brien')").unwrap();
        match s {
            Statement::Insert(q) => {
                assert_eq!(q.rows[0][0], Value::Str("O'Brien".into()));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn conditions_decompose() {
        let conds = parse_conditions("a.x = 1 AND y <> 'z' AND 3 < b").unwrap();
        assert_eq!(conds.len(), 3);
        assert_eq!(
            conds[0],
            Condition::new(
                Operand::Column("a.x".into()),
                CmpOp::Eq,
                Operand::Literal(Value::Int(1))
            )
        );
        assert_eq!(conds[2].as_column_literal(), Some(("b", CmpOp::Gt, &Value::Int(3))));
    }

    #[test]
    fn syntax_errors_carry_position() {
        match parse("SELECT FROM t") {
            Err(Error::Syntax { pos, expected, found }) => {
                assert_eq!(pos, 7);
                assert!(expected.contains("identifier"), "{}", expected);
                assert_eq!(found, "'FROM'");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            parse("CREATE TABLE t (x int)"),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(parse("SELECT * FROM"), Err(Error::Syntax { .. })));
    }

    #[test]
    fn parse_print_parse_is_idempotent() {
        for sql in [
            "select  *  from Students where  id=1  order by name asc",
            "INSERT INTO t (a) VALUES (1), (2)",
            "update T set x = x + 1 where y >= 2",
            "delete from t where name = 'O''Brien'",
            "SELECT a.x, b.y FROM a JOIN b ON a.id = b.id WHERE a.x > 0 GROUP BY a.x ORDER BY b.y DESC",
        ] {
            let once = parse(sql).unwrap();
            let printed = once.to_string();
            let twice = parse(&printed).unwrap();
            assert_eq!(once, twice, "{}", sql);
            assert_eq!(printed, twice.to_string(), "{}", sql);
        }
    }
}
