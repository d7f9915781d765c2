use anyhow::{anyhow, bail, Result};

use crate::{
    ast::{Expression, Program, Statement},
    lexer::Lexer,
    token::Token,
};

#[derive(Debug, Clone, PartialOrd, PartialEq, Eq, Ord)]
enum Precedence {
    Lowest,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

impl Precedence {
    fn from_token(token: &Token) -> Self {
        match token {
            Token::Eq | Token::NotEq => Precedence::Equals,
            Token::Lt | Token::Gt => Precedence::LessGreater,
            Token::Plus | Token::Minus => Precedence::Sum,
            Token::Asterisk | Token::Slash => Precedence::Product,
            Token::Lparen => Precedence::Call,
            Token::Lbracket => Precedence::Index,
            _ => Precedence::Lowest,
        }
    }
}

pub struct Parser {
    lexer: Lexer,
    cur_token: Option<Token>,
    peek_token: Option<Token>,
}

impl Parser {
    pub fn new(mut lexer: Lexer) -> Self {
        Self {
            cur_token: lexer.next_token(),
            peek_token: lexer.next_token(),
            lexer,
        }
    }

    pub fn parse_program(&mut self) -> Result<Program> {
        let mut statements: Vec<Statement> = Vec::new();
        while self.cur_token.is_some() {
            let statement = self.parse_statement()?;
            statements.push(statement);
            self.next_token();
        }
        Ok(Program { statements })
    }

    fn cur_token(&self) -> Result<Token> {
        self.cur_token
            .clone()
            .ok_or(anyhow!("unexpected end of input"))
    }

    fn peek_is(&self, token: &Token) -> bool {
        self.peek_token
            .as_ref()
            .is_some_and(|peek| peek.variant_eq(token))
    }

    fn next_token(&mut self) -> &mut Self {
        self.cur_token = self.peek_token.take();
        self.peek_token = self.lexer.next_token();
        self
    }

    fn peek_precedence(&self) -> Precedence {
        self.peek_token
            .as_ref()
            .map(Precedence::from_token)
            .unwrap_or(Precedence::Lowest)
    }

    fn cur_precedence(&self) -> Result<Precedence> {
        Ok(Precedence::from_token(&self.cur_token()?))
    }

    fn expect_peek(&mut self, exp_token: Token) -> Result<()> {
        match &self.peek_token {
            Some(peek_token) if peek_token.variant_eq(&exp_token) => {
                self.next_token();
                Ok(())
            }
            Some(peek_token) => bail!("expected next token to be {exp_token}, found {peek_token}"),
            None => bail!("expected next token to be {exp_token}, found end of input"),
        }
    }

    fn skip_semicolon(&mut self) {
        if self.peek_is(&Token::Semicolon) {
            self.next_token();
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.cur_token()? {
            Token::Let => self.parse_let_statement(),
            Token::Return => {
                let value = self.parse_keyword_operand()?;
                Ok(Statement::Return(value))
            }
            Token::Throw => {
                let value = self.parse_keyword_operand()?;
                Ok(Statement::Throw(value))
            }
            Token::Semicolon => Ok(Statement::Block(vec![])),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> Result<Statement> {
        let name = match self.next_token().cur_token()? {
            Token::Ident(value) => value,
            token => bail!("expected identifier, found {token}"),
        };

        self.expect_peek(Token::Assign)?;

        self.next_token();

        let value = self.parse_expression(Precedence::Lowest)?;

        self.skip_semicolon();

        Ok(Statement::Let { name, value })
    }

    /// Operand of `return` and `throw`.
    fn parse_keyword_operand(&mut self) -> Result<Expression> {
        self.next_token();

        let value = self.parse_expression(Precedence::Lowest)?;

        self.skip_semicolon();

        Ok(value)
    }

    fn parse_expression_statement(&mut self) -> Result<Statement> {
        let expression = self.parse_expression(Precedence::Lowest)?;

        self.skip_semicolon();

        Ok(Statement::Expression(expression))
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Result<Expression> {
        let cur_token = self.cur_token()?;

        let mut left_exp = match cur_token.clone() {
            Token::Ident(value) => Expression::Identifier(value),
            Token::Int(value) => self.parse_integer_literal(value)?,
            Token::String(value) => Expression::StringLiteral(value),
            Token::True => Expression::BooleanLiteral(true),
            Token::False => Expression::BooleanLiteral(false),
            Token::Null => Expression::NullLiteral,
            Token::Bang | Token::Minus => self.parse_prefix_expression(cur_token)?,
            Token::Lparen => self.parse_grouped_expression()?,
            Token::Lbracket => Expression::ArrayLiteral(self.parse_expression_list(Token::Rbracket)?),
            Token::If => self.parse_if_expression()?,
            Token::Function => self.parse_function_literal()?,
            Token::Illegal(value) => bail!("illegal token {value}"),
            token => bail!("no prefix parse function for {token}"),
        };

        while !self.peek_is(&Token::Semicolon) && precedence < self.peek_precedence() {
            match self.peek_token.clone() {
                Some(
                    Token::Plus
                    | Token::Minus
                    | Token::Asterisk
                    | Token::Slash
                    | Token::Eq
                    | Token::NotEq
                    | Token::Lt
                    | Token::Gt,
                ) => {
                    self.next_token();
                    left_exp = self.parse_infix_expression(left_exp)?;
                }
                Some(Token::Lparen) => {
                    self.next_token();
                    let arguments = self.parse_expression_list(Token::Rparen)?;
                    left_exp = Expression::Call {
                        function: Box::new(left_exp),
                        arguments,
                    };
                }
                Some(Token::Lbracket) => {
                    self.next_token();
                    left_exp = self.parse_index_expression(left_exp)?;
                }
                _ => return Ok(left_exp),
            };
        }

        Ok(left_exp)
    }

    fn parse_prefix_expression(&mut self, token: Token) -> Result<Expression> {
        self.next_token();
        let right = self.parse_expression(Precedence::Prefix)?;
        Ok(Expression::Prefix {
            operator: token,
            right: Box::new(right),
        })
    }

    fn parse_infix_expression(&mut self, left: Expression) -> Result<Expression> {
        let token = self.cur_token()?;
        let precedence = self.cur_precedence()?;
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Ok(Expression::Infix {
            left: Box::new(left),
            operator: token,
            right: Box::new(right),
        })
    }

    fn parse_integer_literal(&mut self, literal: String) -> Result<Expression> {
        let value = literal
            .parse::<i64>()
            .map_err(|err| anyhow!("could not parse integer literal as i64: {err}"))?;
        Ok(Expression::IntegerLiteral(value))
    }

    fn parse_grouped_expression(&mut self) -> Result<Expression> {
        self.next_token();
        let exp = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(Token::Rparen)?;
        Ok(exp)
    }

    fn parse_if_expression(&mut self) -> Result<Expression> {
        self.expect_peek(Token::Lparen)?;

        self.next_token();

        let condition = self.parse_expression(Precedence::Lowest)?;

        self.expect_peek(Token::Rparen)?;

        self.expect_peek(Token::Lbrace)?;

        let consequence = self.parse_block_statement()?;

        let alternative = if self.peek_is(&Token::Else) {
            self.next_token();
            self.expect_peek(Token::Lbrace)?;
            Some(Box::new(self.parse_block_statement()?))
        } else {
            None
        };

        Ok(Expression::If {
            condition: Box::new(condition),
            consequence: Box::new(consequence),
            alternative,
        })
    }

    fn parse_function_literal(&mut self) -> Result<Expression> {
        self.expect_peek(Token::Lparen)?;

        let mut parameters = vec![];
        while !self.peek_is(&Token::Rparen) {
            match self.next_token().cur_token()? {
                Token::Ident(name) => parameters.push(name),
                token => bail!("expected parameter name, found {token}"),
            }
            if !self.peek_is(&Token::Rparen) {
                self.expect_peek(Token::Comma)?;
            }
        }
        self.expect_peek(Token::Rparen)?;

        self.expect_peek(Token::Lbrace)?;

        let body = self.parse_block_statement()?;

        Ok(Expression::FunctionLiteral {
            parameters,
            body: Box::new(body),
        })
    }

    fn parse_expression_list(&mut self, end_token: Token) -> Result<Vec<Expression>> {
        let mut expressions: Vec<Expression> = Vec::new();

        if self.peek_is(&end_token) {
            self.next_token();
            return Ok(expressions);
        }

        self.next_token();
        expressions.push(self.parse_expression(Precedence::Lowest)?);

        while self.peek_is(&Token::Comma) {
            self.next_token();
            self.next_token();
            expressions.push(self.parse_expression(Precedence::Lowest)?);
        }

        self.expect_peek(end_token)?;

        Ok(expressions)
    }

    fn parse_block_statement(&mut self) -> Result<Statement> {
        self.next_token();

        let mut statements: Vec<Statement> = Vec::new();

        loop {
            match self.cur_token {
                Some(Token::Rbrace) => break,
                Some(_) => {
                    statements.push(self.parse_statement()?);
                    self.next_token();
                }
                None => bail!("expected }}, found end of input"),
            }
        }

        Ok(Statement::Block(statements))
    }

    fn parse_index_expression(&mut self, left: Expression) -> Result<Expression> {
        self.next_token();
        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(Token::Rbracket)?;
        Ok(Expression::Index {
            left: Box::new(left),
            index: Box::new(index),
        })
    }
}
