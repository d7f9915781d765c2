use crate::token::Token;

pub struct Lexer {
    chars: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            position: 0,
        }
    }

    pub fn next_token(&mut self) -> Option<Token> {
        self.skip_trivia();

        let char = self.char()?;
        self.read_char();

        let token = match char {
            '=' if self.eat('=') => Token::Eq,
            '=' => Token::Assign,
            '!' if self.eat('=') => Token::NotEq,
            '!' => Token::Bang,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Asterisk,
            '/' => Token::Slash,
            '<' => Token::Lt,
            '>' => Token::Gt,
            ';' => Token::Semicolon,
            ',' => Token::Comma,
            '(' => Token::Lparen,
            ')' => Token::Rparen,
            '{' => Token::Lbrace,
            '}' => Token::Rbrace,
            '[' => Token::Lbracket,
            ']' => Token::Rbracket,
            '"' => self.read_string(),
            _ if char.is_ascii_digit() => {
                let mut literal = char.to_string();
                literal.push_str(&self.read_while(|char| char.is_ascii_digit()));
                Token::Int(literal)
            }
            _ if char.is_ascii_alphabetic() || char == '_' => {
                let mut literal = char.to_string();
                literal.push_str(&self.read_while(|char| char.is_ascii_alphanumeric() || char == '_'));
                Token::keyword(&literal).unwrap_or(Token::Ident(literal))
            }
            _ => Token::Illegal(char.to_string()),
        };

        Some(token)
    }

    fn char(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn read_char(&mut self) {
        self.position += 1;
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.char() == Some(expected) {
            self.read_char();
            return true;
        }
        false
    }

    /// Whitespace and `//` line comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.char() {
                Some(char) if char.is_whitespace() => self.read_char(),
                Some('/') if self.chars.get(self.position + 1) == Some(&'/') => {
                    self.read_while(|char| char != '\n');
                }
                _ => return,
            }
        }
    }

    fn read_while(&mut self, condition: impl Fn(char) -> bool) -> String {
        let mut literal = String::new();
        while let Some(char) = self.char() {
            if !condition(char) {
                break;
            }
            literal.push(char);
            self.read_char();
        }
        literal
    }

    fn read_string(&mut self) -> Token {
        let mut literal = String::new();
        loop {
            let Some(char) = self.char() else {
                return Token::Illegal(format!("\"{literal}"));
            };
            self.read_char();
            match char {
                '"' => return Token::String(literal),
                '\\' => {
                    let escaped = match self.char() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some(other) => return Token::Illegal(format!("\\{other}")),
                        None => return Token::Illegal(format!("\"{literal}\\")),
                    };
                    self.read_char();
                    literal.push(escaped);
                }
                _ => literal.push(char),
            }
        }
    }
}
