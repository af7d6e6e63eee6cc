// Recursive-descent SQL parser.

use crate::access::value::{DataType, Value};
use crate::error::{DbError, DbResult};
use crate::sql::ast::*;
use crate::sql::lexer::Lexer;
use crate::sql::token::Token;

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(input: &str) -> DbResult<Self> {
        Ok(Parser {
            tokens: Lexer::new(input).tokenize()?,
            position: 0,
        })
    }

    /// Parses one statement from SQL text.
    pub fn parse_statement(input: &str) -> DbResult<Statement> {
        let mut parser = Parser::new(input)?;
        let statement = parser.statement()?;
        parser.consume_if(&Token::Semicolon);
        parser.expect(&Token::Eof)?;
        Ok(statement)
    }

    fn statement(&mut self) -> DbResult<Statement> {
        match self.peek() {
            Token::Select => self.select().map(Statement::Select),
            Token::Insert => self.insert(),
            Token::Update => self.update(),
            Token::Delete => self.delete(),
            Token::Create => self.create(),
            Token::Drop => self.drop(),
            Token::Alter => self.alter(),
            Token::Begin => {
                self.advance();
                self.consume_if(&Token::Transaction);
                Ok(Statement::Begin)
            }
            Token::Commit => {
                self.advance();
                Ok(Statement::Commit)
            }
            Token::Rollback => {
                self.advance();
                Ok(Statement::Rollback)
            }
            other => Err(DbError::QuerySyntax(format!(
                "expected a statement, found {:?}",
                other
            ))),
        }
    }

    fn select(&mut self) -> DbResult<SelectStatement> {
        self.expect(&Token::Select)?;
        let distinct = self.consume_if(&Token::Distinct);

        let mut projections = Vec::new();
        loop {
            if self.consume_if(&Token::Star) {
                projections.push(SelectItem::AllColumns);
            } else {
                let expr = self.expression()?;
                let alias = if self.consume_if(&Token::As) {
                    Some(self.identifier()?)
                } else if let Token::Identifier(name) = self.peek().clone() {
                    self.advance();
                    Some(name)
                } else {
                    None
                };
                projections.push(SelectItem::Expression(expr, alias));
            }
            if !self.consume_if(&Token::Comma) {
                break;
            }
        }

        let from = if self.consume_if(&Token::From) {
            Some(self.table_reference()?)
        } else {
            None
        };

        let mut joins = Vec::new();
        loop {
            let join_type = match self.peek() {
                Token::Join => {
                    self.advance();
                    JoinType::Inner
                }
                Token::Inner => {
                    self.advance();
                    self.expect(&Token::Join)?;
                    JoinType::Inner
                }
                Token::Left => {
                    self.advance();
                    self.consume_if(&Token::Outer);
                    self.expect(&Token::Join)?;
                    JoinType::Left
                }
                Token::Right => {
                    self.advance();
                    self.consume_if(&Token::Outer);
                    self.expect(&Token::Join)?;
                    JoinType::Right
                }
                Token::Full => {
                    self.advance();
                    self.consume_if(&Token::Outer);
                    self.expect(&Token::Join)?;
                    JoinType::Full
                }
                Token::Cross => {
                    self.advance();
                    self.expect(&Token::Join)?;
                    JoinType::Cross
                }
                _ => break,
            };
            let table = self.table_reference()?;
            let on = if join_type == JoinType::Cross {
                None
            } else {
                self.expect(&Token::On)?;
                Some(self.expression()?)
            };
            joins.push(Join {
                join_type,
                table,
                on,
            });
        }

        let where_clause = if self.consume_if(&Token::Where) {
            Some(self.expression()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.consume_if(&Token::Group) {
            self.expect(&Token::By)?;
            loop {
                group_by.push(self.expression()?);
                if !self.consume_if(&Token::Comma) {
                    break;
                }
            }
        }

        let having = if self.consume_if(&Token::Having) {
            Some(self.expression()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.consume_if(&Token::Order) {
            self.expect(&Token::By)?;
            loop {
                let expression = self.expression()?;
                let ascending = if self.consume_if(&Token::Desc) {
                    false
                } else {
                    self.consume_if(&Token::Asc);
                    true
                };
                order_by.push(OrderByItem {
                    expression,
                    ascending,
                });
                if !self.consume_if(&Token::Comma) {
                    break;
                }
            }
        }

        let limit = if self.consume_if(&Token::Limit) {
            Some(self.unsigned_number()?)
        } else {
            None
        };
        let offset = if self.consume_if(&Token::Offset) {
            Some(self.unsigned_number()?)
        } else {
            None
        };

        Ok(SelectStatement {
            distinct,
            projections,
            from,
            joins,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn insert(&mut self) -> DbResult<Statement> {
        self.expect(&Token::Insert)?;
        self.expect(&Token::Into)?;
        let table = self.identifier()?;

        let columns = if self.peek() == &Token::LeftParen {
            self.advance();
            let mut cols = Vec::new();
            loop {
                cols.push(self.identifier()?);
                if !self.consume_if(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RightParen)?;
            Some(cols)
        } else {
            None
        };

        self.expect(&Token::Values)?;
        let mut rows = Vec::new();
        loop {
            self.expect(&Token::LeftParen)?;
            let mut row = Vec::new();
            loop {
                row.push(self.expression()?);
                if !self.consume_if(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RightParen)?;
            rows.push(row);
            if !self.consume_if(&Token::Comma) {
                break;
            }
        }

        Ok(Statement::Insert(InsertStatement {
            table,
            columns,
            rows,
        }))
    }

    fn update(&mut self) -> DbResult<Statement> {
        self.expect(&Token::Update)?;
        let table = self.identifier()?;
        self.expect(&Token::Set)?;

        let mut assignments = Vec::new();
        loop {
            let column = self.identifier()?;
            self.expect(&Token::Equal)?;
            assignments.push((column, self.expression()?));
            if !self.consume_if(&Token::Comma) {
                break;
            }
        }

        let where_clause = if self.consume_if(&Token::Where) {
            Some(self.expression()?)
        } else {
            None
        };
        Ok(Statement::Update(UpdateStatement {
            table,
            assignments,
            where_clause,
        }))
    }

    fn delete(&mut self) -> DbResult<Statement> {
        self.expect(&Token::Delete)?;
        self.expect(&Token::From)?;
        let table = self.identifier()?;
        let where_clause = if self.consume_if(&Token::Where) {
            Some(self.expression()?)
        } else {
            None
        };
        Ok(Statement::Delete(DeleteStatement {
            table,
            where_clause,
        }))
    }

    fn create(&mut self) -> DbResult<Statement> {
        self.expect(&Token::Create)?;
        match self.peek() {
            Token::Table => self.create_table(),
            Token::Unique | Token::Index => self.create_index(),
            other => Err(DbError::QuerySyntax(format!(
                "expected TABLE or INDEX after CREATE, found {:?}",
                other
            ))),
        }
    }

    fn create_table(&mut self) -> DbResult<Statement> {
        self.expect(&Token::Table)?;
        let table = self.identifier()?;
        self.expect(&Token::LeftParen)?;

        let mut columns = Vec::new();
        let mut primary_key: Vec<String> = Vec::new();
        loop {
            if self.peek() == &Token::Primary {
                self.advance();
                self.expect(&Token::Key)?;
                self.expect(&Token::LeftParen)?;
                loop {
                    primary_key.push(self.identifier()?);
                    if !self.consume_if(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RightParen)?;
            } else {
                let name = self.identifier()?;
                let data_type = self.data_type()?;
                let mut nullable = true;
                loop {
                    if self.peek() == &Token::Not {
                        self.advance();
                        self.expect(&Token::Null)?;
                        nullable = false;
                    } else if self.consume_if(&Token::Null) {
                        nullable = true;
                    } else if self.peek() == &Token::Primary {
                        self.advance();
                        self.expect(&Token::Key)?;
                        primary_key.push(name.clone());
                        nullable = false;
                    } else {
                        break;
                    }
                }
                columns.push(ColumnSpec {
                    name,
                    data_type,
                    nullable,
                });
            }
            if !self.consume_if(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RightParen)?;

        Ok(Statement::CreateTable(CreateTableStatement {
            table,
            columns,
            primary_key,
        }))
    }

    fn create_index(&mut self) -> DbResult<Statement> {
        let unique = self.consume_if(&Token::Unique);
        self.expect(&Token::Index)?;
        let index = self.identifier()?;
        self.expect(&Token::On)?;
        let table = self.identifier()?;
        self.expect(&Token::LeftParen)?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.identifier()?);
            if !self.consume_if(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RightParen)?;
        Ok(Statement::CreateIndex(CreateIndexStatement {
            index,
            table,
            columns,
            unique,
        }))
    }

    fn drop(&mut self) -> DbResult<Statement> {
        self.expect(&Token::Drop)?;
        match self.peek() {
            Token::Table => {
                self.advance();
                Ok(Statement::DropTable {
                    table: self.identifier()?,
                })
            }
            Token::Index => {
                self.advance();
                Ok(Statement::DropIndex {
                    index: self.identifier()?,
                })
            }
            other => Err(DbError::QuerySyntax(format!(
                "expected TABLE or INDEX after DROP, found {:?}",
                other
            ))),
        }
    }

    fn alter(&mut self) -> DbResult<Statement> {
        self.expect(&Token::Alter)?;
        self.expect(&Token::Table)?;
        let table = self.identifier()?;
        match self.peek() {
            Token::Add => {
                self.advance();
                self.consume_if(&Token::Column);
                let name = self.identifier()?;
                let data_type = self.data_type()?;
                let nullable = if self.peek() == &Token::Not {
                    self.advance();
                    self.expect(&Token::Null)?;
                    false
                } else {
                    self.consume_if(&Token::Null);
                    true
                };
                Ok(Statement::AlterTable(AlterTableStatement::AddColumn {
                    table,
                    column: ColumnSpec {
                        name,
                        data_type,
                        nullable,
                    },
                }))
            }
            Token::Drop => {
                self.advance();
                self.consume_if(&Token::Column);
                Ok(Statement::AlterTable(AlterTableStatement::DropColumn {
                    table,
                    column: self.identifier()?,
                }))
            }
            other => Err(DbError::QuerySyntax(format!(
                "expected ADD or DROP after ALTER TABLE, found {:?}",
                other
            ))),
        }
    }

    fn table_reference(&mut self) -> DbResult<TableReference> {
        let name = self.identifier()?;
        let alias = if self.consume_if(&Token::As) {
            Some(self.identifier()?)
        } else if let Token::Identifier(alias) = self.peek().clone() {
            self.advance();
            Some(alias)
        } else {
            None
        };
        Ok(TableReference { name, alias })
    }

    fn data_type(&mut self) -> DbResult<DataType> {
        let token = self.peek().clone();
        let data_type = match token {
            Token::Int | Token::Integer => DataType::Int32,
            Token::Bigint => DataType::Int64,
            Token::Double | Token::Float | Token::Real => DataType::Float64,
            Token::StringType | Token::Text | Token::Varchar => DataType::Text,
            Token::Boolean => DataType::Boolean,
            Token::Json => DataType::Json,
            Token::Vector => DataType::Vector,
            Token::Timestamp => DataType::Timestamp,
            Token::Binary | Token::Blob => DataType::Binary,
            other => {
                return Err(DbError::QuerySyntax(format!(
                    "expected a data type, found {:?}",
                    other
                )))
            }
        };
        self.advance();
        // Optional length/dimension argument, accepted and ignored:
        // VARCHAR(255), VECTOR(3).
        if self.consume_if(&Token::LeftParen) {
            self.unsigned_number()?;
            self.expect(&Token::RightParen)?;
        }
        Ok(data_type)
    }

    // Expression grammar, loosest first: OR, AND, NOT, comparison,
    // additive, multiplicative, unary, primary.
    fn expression(&mut self) -> DbResult<Expression> {
        self.or_expression()
    }

    fn or_expression(&mut self) -> DbResult<Expression> {
        let mut left = self.and_expression()?;
        while self.consume_if(&Token::Or) {
            let right = self.and_expression()?;
            left = Expression::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::Or,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expression(&mut self) -> DbResult<Expression> {
        let mut left = self.not_expression()?;
        while self.consume_if(&Token::And) {
            let right = self.not_expression()?;
            left = Expression::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::And,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_expression(&mut self) -> DbResult<Expression> {
        if self.consume_if(&Token::Not) {
            let operand = self.not_expression()?;
            return Ok(Expression::UnaryOp {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> DbResult<Expression> {
        let left = self.additive()?;

        if self.consume_if(&Token::Is) {
            let negated = self.consume_if(&Token::Not);
            self.expect(&Token::Null)?;
            return Ok(Expression::IsNull {
                operand: Box::new(left),
                negated,
            });
        }

        let op = match self.peek() {
            Token::Equal => BinaryOperator::Equal,
            Token::NotEqual => BinaryOperator::NotEqual,
            Token::Less => BinaryOperator::Less,
            Token::Greater => BinaryOperator::Greater,
            Token::LessEqual => BinaryOperator::LessEqual,
            Token::GreaterEqual => BinaryOperator::GreaterEqual,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.additive()?;
        Ok(Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn additive(&mut self) -> DbResult<Expression> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOperator::Plus,
                Token::Minus => BinaryOperator::Minus,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn multiplicative(&mut self) -> DbResult<Expression> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                Token::Percent => BinaryOperator::Modulo,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self) -> DbResult<Expression> {
        if self.consume_if(&Token::Minus) {
            let operand = self.unary()?;
            // Fold negation into numeric literals directly.
            if let Expression::Literal(value) = &operand {
                match value {
                    Value::Int32(v) => return Ok(Expression::Literal(Value::Int32(-v))),
                    Value::Int64(v) => return Ok(Expression::Literal(Value::Int64(-v))),
                    Value::Float64(v) => return Ok(Expression::Literal(Value::Float64(-v))),
                    _ => {}
                }
            }
            return Ok(Expression::UnaryOp {
                op: UnaryOperator::Minus,
                operand: Box::new(operand),
            });
        }
        self.consume_if(&Token::Plus);
        self.primary()
    }

    fn primary(&mut self) -> DbResult<Expression> {
        match self.peek().clone() {
            Token::Number(text) => {
                self.advance();
                Ok(Expression::Literal(parse_number(&text)?))
            }
            Token::String(text) => {
                self.advance();
                Ok(Expression::Literal(Value::Text(text)))
            }
            Token::HexBlob(bytes) => {
                self.advance();
                Ok(Expression::Literal(Value::Binary(bytes)))
            }
            Token::True => {
                self.advance();
                Ok(Expression::Literal(Value::Boolean(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expression::Literal(Value::Boolean(false)))
            }
            Token::Null => {
                self.advance();
                Ok(Expression::Literal(Value::Null))
            }
            Token::LeftBracket => self.vector_literal(),
            Token::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(&Token::RightParen)?;
                Ok(expr)
            }
            Token::Identifier(name) => {
                self.advance();
                if self.consume_if(&Token::Dot) {
                    let column = self.identifier()?;
                    return Ok(Expression::QualifiedColumn(name, column));
                }
                if self.peek() == &Token::LeftParen {
                    self.advance();
                    let mut args = Vec::new();
                    if self.consume_if(&Token::Star) {
                        // COUNT(*) takes no argument expressions.
                    } else if self.peek() != &Token::RightParen {
                        loop {
                            args.push(self.expression()?);
                            if !self.consume_if(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RightParen)?;
                    return Ok(Expression::Function { name, args });
                }
                Ok(Expression::Column(name))
            }
            other => Err(DbError::QuerySyntax(format!(
                "unexpected token {:?} in expression",
                other
            ))),
        }
    }

    fn vector_literal(&mut self) -> DbResult<Expression> {
        self.expect(&Token::LeftBracket)?;
        let mut components = Vec::new();
        if self.peek() != &Token::RightBracket {
            loop {
                let negative = self.consume_if(&Token::Minus);
                let Token::Number(text) = self.peek().clone() else {
                    return Err(DbError::QuerySyntax(
                        "vector literals hold numbers only".into(),
                    ));
                };
                self.advance();
                let magnitude: f32 = text.parse().map_err(|_| {
                    DbError::QuerySyntax(format!("invalid vector component '{}'", text))
                })?;
                components.push(if negative { -magnitude } else { magnitude });
                if !self.consume_if(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RightBracket)?;
        Ok(Expression::Literal(Value::Vector(components)))
    }

    fn identifier(&mut self) -> DbResult<String> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(DbError::QuerySyntax(format!(
                "expected an identifier, found {:?}",
                other
            ))),
        }
    }

    fn unsigned_number(&mut self) -> DbResult<u64> {
        match self.peek().clone() {
            Token::Number(text) => {
                self.advance();
                text.parse().map_err(|_| {
                    DbError::QuerySyntax(format!("expected an unsigned integer, found '{}'", text))
                })
            }
            other => Err(DbError::QuerySyntax(format!(
                "expected a number, found {:?}",
                other
            ))),
        }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn consume_if(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> DbResult<()> {
        if self.peek() == token {
            self.advance();
            Ok(())
        } else {
            Err(DbError::QuerySyntax(format!(
                "expected {:?}, found {:?}",
                token,
                self.peek()
            )))
        }
    }
}

fn parse_number(text: &str) -> DbResult<Value> {
    if text.contains('.') || text.contains('e') || text.contains('E') {
        return text
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|_| DbError::QuerySyntax(format!("invalid number '{}'", text)));
    }
    if let Ok(v) = text.parse::<i32>() {
        return Ok(Value::Int32(v));
    }
    text.parse::<i64>()
        .map(Value::Int64)
        .map_err(|_| DbError::QuerySyntax(format!("invalid number '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Statement {
        Parser::parse_statement(input).unwrap()
    }

    #[test]
    fn test_create_table_with_inline_pk() {
        let stmt = parse("CREATE TABLE users(id INT PRIMARY KEY, name STRING)");
        let Statement::CreateTable(ct) = stmt else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(ct.table, "users");
        assert_eq!(ct.columns.len(), 2);
        assert_eq!(ct.primary_key, vec!["id"]);
        assert!(!ct.columns[0].nullable);
        assert_eq!(ct.columns[1].data_type, DataType::Text);
    }

    #[test]
    fn test_create_table_with_table_level_pk() {
        let stmt = parse(
            "CREATE TABLE e(graph STRING NOT NULL, dst STRING NOT NULL, PRIMARY KEY(graph, dst))",
        );
        let Statement::CreateTable(ct) = stmt else {
            panic!();
        };
        assert_eq!(ct.primary_key, vec!["graph", "dst"]);
    }

    #[test]
    fn test_insert_multi_row() {
        let stmt = parse("INSERT INTO users VALUES (1, 'Alice'), (2, 'Bob')");
        let Statement::Insert(ins) = stmt else { panic!() };
        assert_eq!(ins.rows.len(), 2);
        assert_eq!(
            ins.rows[0][1],
            Expression::Literal(Value::Text("Alice".into()))
        );
    }

    #[test]
    fn test_select_with_everything() {
        let stmt = parse(
            "SELECT name, COUNT(*) AS n FROM users JOIN orders ON users.id = orders.user_id \
             WHERE age >= 18 GROUP BY name HAVING COUNT(*) > 1 ORDER BY n DESC LIMIT 10 OFFSET 5",
        );
        let Statement::Select(sel) = stmt else { panic!() };
        assert_eq!(sel.projections.len(), 2);
        assert_eq!(sel.joins.len(), 1);
        assert!(sel.where_clause.is_some());
        assert_eq!(sel.group_by.len(), 1);
        assert!(sel.having.is_some());
        assert_eq!(sel.order_by.len(), 1);
        assert!(!sel.order_by[0].ascending);
        assert_eq!(sel.limit, Some(10));
        assert_eq!(sel.offset, Some(5));
    }

    #[test]
    fn test_expression_precedence() {
        let stmt = parse("SELECT 1 + 2 * 3");
        let Statement::Select(sel) = stmt else { panic!() };
        let SelectItem::Expression(expr, _) = &sel.projections[0] else {
            panic!();
        };
        // Multiplication binds tighter: 1 + (2 * 3).
        let Expression::BinaryOp { op, right, .. } = expr else {
            panic!();
        };
        assert_eq!(*op, BinaryOperator::Plus);
        assert!(matches!(
            **right,
            Expression::BinaryOp {
                op: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_vector_literal() {
        let stmt = parse("INSERT INTO v VALUES ([0.1, -0.2, 3])");
        let Statement::Insert(ins) = stmt else { panic!() };
        assert_eq!(
            ins.rows[0][0],
            Expression::Literal(Value::Vector(vec![0.1, -0.2, 3.0]))
        );
    }

    #[test]
    fn test_update_and_delete() {
        let stmt = parse("UPDATE users SET age = 30, name = 'X' WHERE id = 1");
        let Statement::Update(up) = stmt else { panic!() };
        assert_eq!(up.assignments.len(), 2);
        assert!(up.where_clause.is_some());

        let stmt = parse("DELETE FROM users WHERE id = 1");
        assert!(matches!(stmt, Statement::Delete(_)));
    }

    #[test]
    fn test_ddl_statements() {
        assert!(matches!(
            parse("DROP TABLE users"),
            Statement::DropTable { .. }
        ));
        assert!(matches!(
            parse("CREATE UNIQUE INDEX idx_name ON users(name)"),
            Statement::CreateIndex(CreateIndexStatement { unique: true, .. })
        ));
        assert!(matches!(
            parse("ALTER TABLE users ADD COLUMN bio TEXT"),
            Statement::AlterTable(AlterTableStatement::AddColumn { .. })
        ));
        assert!(matches!(
            parse("ALTER TABLE users DROP COLUMN bio"),
            Statement::AlterTable(AlterTableStatement::DropColumn { .. })
        ));
    }

    #[test]
    fn test_transaction_statements() {
        assert_eq!(parse("BEGIN"), Statement::Begin);
        assert_eq!(parse("BEGIN TRANSACTION"), Statement::Begin);
        assert_eq!(parse("COMMIT"), Statement::Commit);
        assert_eq!(parse("ROLLBACK"), Statement::Rollback);
    }

    #[test]
    fn test_is_null() {
        let stmt = parse("SELECT * FROM t WHERE name IS NOT NULL");
        let Statement::Select(sel) = stmt else { panic!() };
        assert!(matches!(
            sel.where_clause,
            Some(Expression::IsNull { negated: true, .. })
        ));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            Parser::parse_statement("SELECT FROM"),
            Err(DbError::QuerySyntax(_))
        ));
        assert!(matches!(
            Parser::parse_statement("INSERT users VALUES (1)"),
            Err(DbError::QuerySyntax(_))
        ));
        assert!(matches!(
            Parser::parse_statement("SELECT 1 extra garbage ("),
            Err(DbError::QuerySyntax(_))
        ));
        assert!(matches!(
            Parser::parse_statement(""),
            Err(DbError::QuerySyntax(_))
        ));
    }

    #[test]
    fn test_number_widths() {
        let stmt = parse("SELECT 5000000000");
        let Statement::Select(sel) = stmt else { panic!() };
        let SelectItem::Expression(Expression::Literal(v), _) = &sel.projections[0] else {
            panic!();
        };
        assert_eq!(*v, Value::Int64(5_000_000_000));
    }
}
