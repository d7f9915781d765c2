use anyhow::{anyhow, bail, Result};

use crate::{
    ast::{Expression, Program, Statement},
    object::{CompiledFunction, Object, ObjectType},
    runtime::builtins::BUILTINS,
    snippet::SnippetId,
    token::Token,
};

use super::{
    code::{Instructions, Opcode},
    symbol_table::{SymbolScope, SymbolTable},
    unit::{CompiledUnit, Declaration},
};

/// The compiler is responsible for converting the AST into bytecode.
/// It does this by walking the AST and emitting bytecode instructions for each node.
/// It uses a single pass with back-patching to handle forward references.
///
/// The global symbol table and the constant counter survive between
/// snippets, which is what lets a snippet refer to names declared by earlier
/// ones.
pub struct Compiler {
    scopes: Vec<Scope>,
    constants_offset: usize,
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    declarations: Vec<Declaration>,
}

/// Global compiler state as it was before some snippet was compiled.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    symbol_table: SymbolTable,
    constants_offset: usize,
}

struct Scope {
    instructions: Instructions,
    last_instruction: Option<(Opcode, usize)>,
    prev_instruction: Option<(Opcode, usize)>,
}

impl Scope {
    fn new() -> Self {
        Self {
            instructions: Instructions::new(),
            last_instruction: None,
            prev_instruction: None,
        }
    }
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbol_table = SymbolTable::new();
        for (index, builtin) in BUILTINS.iter().enumerate() {
            symbol_table.define_builtin(index, builtin.name);
        }

        Self {
            scopes: vec![Scope::new()],
            constants_offset: 0,
            constants: vec![],
            symbol_table,
            declarations: vec![],
        }
    }

    /// Total number of constants emitted by every unit compiled so far.
    pub fn constants_len(&self) -> usize {
        self.constants_offset
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            symbol_table: self.symbol_table.clone(),
            constants_offset: self.constants_offset,
        }
    }

    /// Forgets every snippet compiled since `checkpoint` was taken.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.symbol_table = checkpoint.symbol_table;
        self.constants_offset = checkpoint.constants_offset;
    }

    /// Compiles one snippet. On failure the global state is rolled back so
    /// that a rejected snippet leaves no trace for the next one.
    pub fn compile(&mut self, snippet: SnippetId, program: Program) -> Result<CompiledUnit> {
        let checkpoint = self.checkpoint();

        let result = self.compile_program(program);

        let scope = std::mem::replace(&mut self.scopes, vec![Scope::new()]);
        let constants = std::mem::take(&mut self.constants);
        let declarations = std::mem::take(&mut self.declarations);

        let declared_type = match result {
            Ok(declared_type) => declared_type,
            Err(err) => {
                self.restore(checkpoint);
                return Err(err);
            }
        };

        let instructions = scope
            .into_iter()
            .next()
            .map(|scope| scope.instructions)
            .ok_or(anyhow!("no top-level scope"))?;

        let unit = CompiledUnit {
            snippet,
            constants_offset: self.constants_offset,
            constants,
            instructions,
            declarations,
            globals_count: self.symbol_table.num_definitions,
            declared_type,
        };
        self.constants_offset += unit.constants.len();

        Ok(unit)
    }

    /// Compiles the top level of a snippet. The trailing expression statement,
    /// if any, becomes the snippet's result.
    fn compile_program(&mut self, program: Program) -> Result<Option<String>> {
        let mut statements = program.statements;
        let last = statements.pop();

        for statement in statements.into_iter() {
            self.compile_statement(statement)?;
        }

        match last {
            Some(Statement::Expression(expression)) => {
                let declared_type = declared_type(&expression);
                self.compile_expression(expression)?;
                self.emit(Opcode::ReturnValue, vec![])?;
                Ok(declared_type)
            }
            Some(statement) => {
                self.compile_statement(statement)?;
                self.emit(Opcode::Return, vec![])?;
                Ok(None)
            }
            None => {
                self.emit(Opcode::Return, vec![])?;
                Ok(None)
            }
        }
    }

    fn current_scope(&mut self) -> Result<&mut Scope> {
        self.scopes.last_mut().ok_or(anyhow!("no active scope"))
    }

    fn enter_scope(&mut self) {
        self.scopes.push(Scope::new());
        self.symbol_table = SymbolTable::new_enclosed(self.symbol_table.clone());
    }

    fn leave_scope(&mut self) -> Result<Instructions> {
        let scope = self.scopes.pop().ok_or(anyhow!("no scope to leave"))?;
        self.symbol_table = match self.symbol_table.outer.take() {
            Some(outer) => *outer,
            None => bail!("no outer scope"),
        };
        Ok(scope.instructions)
    }

    fn emit(&mut self, opcode: Opcode, operands: Vec<usize>) -> Result<usize> {
        let scope = self.current_scope()?;
        let instruction = Instructions::make(opcode, operands)?;
        let pos = scope.instructions.extend(instruction);

        scope.prev_instruction = scope.last_instruction;
        scope.last_instruction = Some((opcode, pos));

        Ok(pos)
    }

    fn last_instruction_is(&mut self, opcode: Opcode) -> Result<bool> {
        Ok(self
            .current_scope()?
            .last_instruction
            .is_some_and(|(last, _)| last == opcode))
    }

    fn remove_last_pop(&mut self) -> Result<()> {
        let scope = self.current_scope()?;
        if let Some((Opcode::Pop, pos)) = scope.last_instruction {
            scope.instructions.drain_at(pos);
            scope.last_instruction = scope.prev_instruction;
        }
        Ok(())
    }

    /// Constants are addressed relative to the unit's offset in the pool.
    fn add_constant(&mut self, object: Object) -> usize {
        self.constants.push(object);
        self.constants.len() - 1
    }

    fn compile_statement(&mut self, statement: Statement) -> Result<()> {
        match statement {
            Statement::Expression(expression) => {
                self.compile_expression(expression)?;
                self.emit(Opcode::Pop, vec![])?;
            }
            Statement::Block(statements) => {
                for statement in statements.into_iter() {
                    self.compile_statement(statement)?;
                }
            }
            Statement::Let { name, value } => self.compile_let_statement(name, value)?,
            Statement::Return(value) => {
                self.compile_expression(value)?;
                self.emit(Opcode::ReturnValue, vec![])?;
            }
            Statement::Throw(value) => {
                self.compile_expression(value)?;
                self.emit(Opcode::Throw, vec![])?;
            }
        }

        Ok(())
    }

    fn compile_let_statement(&mut self, name: String, value: Expression) -> Result<()> {
        // A function sees its own binding so it can recurse.
        let symbol = if matches!(value, Expression::FunctionLiteral { .. }) {
            let symbol = self.symbol_table.define(&name);
            self.compile_expression(value)?;
            symbol
        } else {
            self.compile_expression(value)?;
            self.symbol_table.define(&name)
        };

        match symbol.scope {
            SymbolScope::Global => {
                self.emit(Opcode::SetGlobal, vec![symbol.index])?;
                self.declarations.push(Declaration {
                    name,
                    index: symbol.index,
                });
            }
            SymbolScope::Local => {
                self.emit(Opcode::SetLocal, vec![symbol.index])?;
            }
            scope => bail!("cannot assign to {name} in {scope:?} scope"),
        }
        Ok(())
    }

    fn compile_expression(&mut self, expression: Expression) -> Result<()> {
        match expression {
            Expression::Identifier(name) => self.compile_identifier_expression(name)?,
            Expression::IntegerLiteral(value) => {
                let index = self.add_constant(Object::Integer(value));
                self.emit(Opcode::Constant, vec![index])?;
            }
            Expression::StringLiteral(value) => {
                let index = self.add_constant(Object::String(value));
                self.emit(Opcode::Constant, vec![index])?;
            }
            Expression::BooleanLiteral(true) => {
                self.emit(Opcode::True, vec![])?;
            }
            Expression::BooleanLiteral(false) => {
                self.emit(Opcode::False, vec![])?;
            }
            Expression::NullLiteral => {
                self.emit(Opcode::Null, vec![])?;
            }
            Expression::ArrayLiteral(elements) => {
                let len = elements.len();
                for element in elements.into_iter() {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, vec![len])?;
            }
            Expression::Prefix { operator, right } => {
                self.compile_expression(*right)?;
                match operator {
                    Token::Bang => self.emit(Opcode::Bang, vec![])?,
                    Token::Minus => self.emit(Opcode::Minus, vec![])?,
                    _ => bail!("unimplemented operator: {operator}"),
                };
            }
            Expression::Infix {
                left,
                operator,
                right,
            } => self.compile_infix_expression(*left, operator, *right)?,
            Expression::If {
                condition,
                consequence,
                alternative,
            } => self.compile_conditional_expression(*condition, *consequence, alternative)?,
            Expression::FunctionLiteral { parameters, body } => {
                self.compile_function_literal(parameters, *body)?
            }
            Expression::Call {
                function,
                arguments,
            } => {
                self.compile_expression(*function)?;
                let num_arguments = arguments.len();
                for argument in arguments.into_iter() {
                    self.compile_expression(argument)?;
                }
                self.emit(Opcode::Call, vec![num_arguments])?;
            }
            Expression::Index { left, index } => {
                self.compile_expression(*left)?;
                self.compile_expression(*index)?;
                self.emit(Opcode::Index, vec![])?;
            }
        }

        Ok(())
    }

    fn compile_identifier_expression(&mut self, name: String) -> Result<()> {
        let symbol = self
            .symbol_table
            .resolve(&name)
            .ok_or(anyhow!("unresolved reference: {name}"))?;
        let opcode = match symbol.scope {
            SymbolScope::Global => Opcode::GetGlobal,
            SymbolScope::Local => Opcode::GetLocal,
            SymbolScope::Builtin => Opcode::GetBuiltin,
            SymbolScope::Captured => {
                bail!("closures are not supported: {name} belongs to an enclosing function")
            }
        };
        self.emit(opcode, vec![symbol.index])?;
        Ok(())
    }

    fn compile_infix_expression(
        &mut self,
        left: Expression,
        operator: Token,
        right: Expression,
    ) -> Result<()> {
        // The order of the operands is important for the VM.
        // We re-order the operands for Lt to create a Gt.
        // E.g 1 < 2 => 2 > 1
        if operator == Token::Lt {
            self.compile_expression(right)?;
            self.compile_expression(left)?;
            self.emit(Opcode::GreaterThan, vec![])?;
            return Ok(());
        }

        self.compile_expression(left)?;
        self.compile_expression(right)?;
        match operator {
            Token::Plus => self.emit(Opcode::Add, vec![])?,
            Token::Minus => self.emit(Opcode::Sub, vec![])?,
            Token::Asterisk => self.emit(Opcode::Mul, vec![])?,
            Token::Slash => self.emit(Opcode::Div, vec![])?,
            Token::Eq => self.emit(Opcode::Equal, vec![])?,
            Token::NotEq => self.emit(Opcode::NotEqual, vec![])?,
            Token::Gt => self.emit(Opcode::GreaterThan, vec![])?,
            _ => bail!("unimplemented operator: {operator}"),
        };
        Ok(())
    }

    /// Compiles a block whose value is used, making sure it leaves exactly one
    /// value on the stack.
    fn compile_block_value(&mut self, block: Statement) -> Result<()> {
        self.compile_statement(block)?;
        if self.last_instruction_is(Opcode::Pop)? {
            self.remove_last_pop()?;
        } else {
            self.emit(Opcode::Null, vec![])?;
        }
        Ok(())
    }

    fn compile_conditional_expression(
        &mut self,
        condition: Expression,
        consequence: Statement,
        alternative: Option<Box<Statement>>,
    ) -> Result<()> {
        self.compile_expression(condition)?;

        // We add the jump instruction with a dummy value because we don't know how far we
        // have to jump until we evaluate the number of instructions in the consequence block
        let jump_pos = self.emit(Opcode::JumpNotTruthy, vec![9999])?;

        self.compile_block_value(consequence)?;

        // This is the jump over the else block that the if block will take
        let alternative_jump_pos = self.emit(Opcode::Jump, vec![9999])?;

        let scope = self.current_scope()?;
        let operand = scope.instructions.len();
        scope.instructions.change_u16_operand(jump_pos, operand)?;

        match alternative {
            Some(alternative) => self.compile_block_value(*alternative)?,
            None => {
                self.emit(Opcode::Null, vec![])?;
            }
        }

        let scope = self.current_scope()?;
        let operand = scope.instructions.len();
        scope
            .instructions
            .change_u16_operand(alternative_jump_pos, operand)?;

        Ok(())
    }

    fn compile_function_literal(&mut self, parameters: Vec<String>, body: Statement) -> Result<()> {
        self.enter_scope();

        let num_parameters = parameters.len();
        for param in parameters.iter() {
            self.symbol_table.define(param);
        }

        self.compile_statement(body)?;

        // The value of the last expression statement is the function's result.
        if self.last_instruction_is(Opcode::Pop)? {
            self.remove_last_pop()?;
            self.emit(Opcode::ReturnValue, vec![])?;
        }

        if !self.last_instruction_is(Opcode::ReturnValue)? {
            self.emit(Opcode::Return, vec![])?;
        }

        let num_locals = self.symbol_table.num_definitions;

        let instructions = self.leave_scope()?;

        let index = self.add_constant(Object::Function(std::rc::Rc::new(CompiledFunction {
            instructions,
            constants_offset: self.constants_offset,
            num_locals,
            num_parameters,
        })));
        self.emit(Opcode::Constant, vec![index])?;

        Ok(())
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Type name for results whose type is obvious from the syntax alone.
fn declared_type(expression: &Expression) -> Option<String> {
    let object_type = match expression {
        Expression::IntegerLiteral(_) => ObjectType::Integer,
        Expression::StringLiteral(_) => ObjectType::String,
        Expression::BooleanLiteral(_) => ObjectType::Boolean,
        Expression::ArrayLiteral(_) => ObjectType::Array,
        Expression::FunctionLiteral { .. } => ObjectType::Function,
        Expression::Prefix {
            operator: Token::Bang,
            ..
        } => ObjectType::Boolean,
        Expression::Infix {
            operator: Token::Eq | Token::NotEq | Token::Lt | Token::Gt,
            ..
        } => ObjectType::Boolean,
        _ => return None,
    };
    Some(object_type.name().to_string())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{lexer::Lexer, parser::Parser};

    use super::*;

    fn compile(compiler: &mut Compiler, snippet: u32, input: &str) -> Result<CompiledUnit> {
        let program = Parser::new(Lexer::new(input)).parse_program()?;
        compiler.compile(SnippetId(snippet), program)
    }

    fn make(opcode: Opcode, operands: Vec<usize>) -> Vec<u8> {
        Instructions::make(opcode, operands).unwrap()
    }

    #[test]
    fn test_trailing_expression_is_returned() {
        let mut compiler = Compiler::new();
        let unit = compile(&mut compiler, 0, "1 + 2").unwrap();

        assert_eq!(unit.constants, vec![Object::Integer(1), Object::Integer(2)]);
        assert_eq!(
            unit.instructions,
            Instructions::from(vec![
                make(Opcode::Constant, vec![0]),
                make(Opcode::Constant, vec![1]),
                make(Opcode::Add, vec![]),
                make(Opcode::ReturnValue, vec![]),
            ])
        );
        assert_eq!(unit.declared_type, None);
    }

    #[test]
    fn test_statements_return_unit() {
        let mut compiler = Compiler::new();
        let unit = compile(&mut compiler, 0, "1; let a = true;").unwrap();

        assert_eq!(
            unit.instructions,
            Instructions::from(vec![
                make(Opcode::Constant, vec![0]),
                make(Opcode::Pop, vec![]),
                make(Opcode::True, vec![]),
                make(Opcode::SetGlobal, vec![0]),
                make(Opcode::Return, vec![]),
            ])
        );
        assert_eq!(
            unit.declarations,
            vec![Declaration {
                name: "a".to_string(),
                index: 0
            }]
        );
        assert_eq!(unit.globals_count, 1);
    }

    #[test]
    fn test_constants_continue_across_snippets() {
        let mut compiler = Compiler::new();
        compile(&mut compiler, 0, "let a = 10;").unwrap();
        let unit = compile(&mut compiler, 1, "a + 5").unwrap();

        assert_eq!(unit.constants_offset, 1);
        assert_eq!(unit.constants, vec![Object::Integer(5)]);
        assert_eq!(
            unit.instructions,
            Instructions::from(vec![
                make(Opcode::GetGlobal, vec![0]),
                make(Opcode::Constant, vec![0]),
                make(Opcode::Add, vec![]),
                make(Opcode::ReturnValue, vec![]),
            ])
        );
        assert_eq!(compiler.constants_len(), 2);
    }

    #[test]
    fn test_failed_compile_rolls_back() {
        let mut compiler = Compiler::new();
        compile(&mut compiler, 0, "let a = 1;").unwrap();

        let err = compile(&mut compiler, 1, "let b = 2; c").unwrap_err();
        assert_eq!(err.to_string(), "unresolved reference: c");

        let err = compile(&mut compiler, 2, "b").unwrap_err();
        assert_eq!(err.to_string(), "unresolved reference: b");

        let unit = compile(&mut compiler, 3, "let b = 3; b").unwrap();
        assert_eq!(unit.constants_offset, 1);
        assert_eq!(
            unit.declarations,
            vec![Declaration {
                name: "b".to_string(),
                index: 1
            }]
        );
    }

    #[test]
    fn test_conditionals() {
        let mut compiler = Compiler::new();
        let unit = compile(&mut compiler, 0, "if (true) { 10 }; 3333;").unwrap();

        assert_eq!(
            unit.instructions,
            Instructions::from(vec![
                // 0000
                make(Opcode::True, vec![]),
                // 0001
                make(Opcode::JumpNotTruthy, vec![10]),
                // 0004
                make(Opcode::Constant, vec![0]),
                // 0007
                make(Opcode::Jump, vec![11]),
                // 0010
                make(Opcode::Null, vec![]),
                // 0011
                make(Opcode::Pop, vec![]),
                // 0012
                make(Opcode::Constant, vec![1]),
                // 0015
                make(Opcode::ReturnValue, vec![]),
            ])
        );
    }

    #[test]
    fn test_empty_branch_pushes_null() {
        let mut compiler = Compiler::new();
        let unit = compile(&mut compiler, 0, "if (false) { let x = 1; } else { 2 }").unwrap();

        assert_eq!(
            unit.instructions,
            Instructions::from(vec![
                // 0000
                make(Opcode::False, vec![]),
                // 0001
                make(Opcode::JumpNotTruthy, vec![14]),
                // 0004
                make(Opcode::Constant, vec![0]),
                // 0007
                make(Opcode::SetGlobal, vec![0]),
                // 0010
                make(Opcode::Null, vec![]),
                // 0011
                make(Opcode::Jump, vec![17]),
                // 0014
                make(Opcode::Constant, vec![1]),
                // 0017
                make(Opcode::ReturnValue, vec![]),
            ])
        );
    }

    #[test]
    fn test_functions() {
        let mut compiler = Compiler::new();
        let unit = compile(&mut compiler, 0, "let id = fn(a) { let b = a; b }; id(1)").unwrap();

        assert_eq!(
            unit.constants[0],
            Object::Function(std::rc::Rc::new(CompiledFunction {
                instructions: Instructions::from(vec![
                    make(Opcode::GetLocal, vec![0]),
                    make(Opcode::SetLocal, vec![1]),
                    make(Opcode::GetLocal, vec![1]),
                    make(Opcode::ReturnValue, vec![]),
                ]),
                constants_offset: 0,
                num_locals: 2,
                num_parameters: 1,
            }))
        );
        assert_eq!(
            unit.instructions,
            Instructions::from(vec![
                make(Opcode::Constant, vec![0]),
                make(Opcode::SetGlobal, vec![0]),
                make(Opcode::GetGlobal, vec![0]),
                make(Opcode::Constant, vec![1]),
                make(Opcode::Call, vec![1]),
                make(Opcode::ReturnValue, vec![]),
            ])
        );
        assert_eq!(unit.declared_type, None);
    }

    #[test]
    fn test_empty_function_returns_null() {
        let mut compiler = Compiler::new();
        let unit = compile(&mut compiler, 0, "fn() { }").unwrap();

        assert_eq!(
            unit.constants[0],
            Object::Function(std::rc::Rc::new(CompiledFunction {
                instructions: Instructions::from(vec![make(Opcode::Return, vec![])]),
                constants_offset: 0,
                num_locals: 0,
                num_parameters: 0,
            }))
        );
        assert_eq!(unit.declared_type, Some("Function".to_string()));
    }

    #[test]
    fn test_builtins_and_closures() {
        let mut compiler = Compiler::new();
        let unit = compile(&mut compiler, 0, "len([])").unwrap();
        assert_eq!(
            unit.instructions,
            Instructions::from(vec![
                make(Opcode::GetBuiltin, vec![0]),
                make(Opcode::Array, vec![0]),
                make(Opcode::Call, vec![1]),
                make(Opcode::ReturnValue, vec![]),
            ])
        );

        let err = compile(&mut compiler, 1, "fn(a) { fn() { a } }").unwrap_err();
        assert_eq!(
            err.to_string(),
            "closures are not supported: a belongs to an enclosing function"
        );
    }

    #[test]
    fn test_declared_types() {
        let tests = vec![
            ("1", Some("Int")),
            ("\"a\"", Some("String")),
            ("1 < 2", Some("Boolean")),
            ("[1]", Some("Array")),
            ("1 + 1", None),
            ("let a = 1;", None),
        ];

        for (input, expected) in tests {
            let mut compiler = Compiler::new();
            let unit = compile(&mut compiler, 0, input).unwrap();
            assert_eq!(unit.declared_type.as_deref(), expected, "{input}");
        }
    }

    #[test]
    fn test_restore_forgets_compiled_snippets() {
        let mut compiler = Compiler::new();
        compile(&mut compiler, 0, "let a = 1;").unwrap();
        let checkpoint = compiler.checkpoint();

        compile(&mut compiler, 1, "let a = 2; let b = 3;").unwrap();
        compiler.restore(checkpoint);

        let err = compile(&mut compiler, 2, "b").unwrap_err();
        assert_eq!(err.to_string(), "unresolved reference: b");

        let unit = compile(&mut compiler, 3, "a").unwrap();
        assert_eq!(unit.constants_offset, 1);
        assert_eq!(
            unit.instructions,
            Instructions::from(vec![
                make(Opcode::GetGlobal, vec![0]),
                make(Opcode::ReturnValue, vec![]),
            ])
        );
    }

    #[test]
    fn test_constant_operands_stay_local_to_the_unit() {
        let mut compiler = Compiler::new();
        for snippet in 0..70_000 {
            compile(&mut compiler, snippet, "41 + 1").unwrap();
        }

        let unit = compile(&mut compiler, 70_000, "fn() { 7 }").unwrap();
        assert_eq!(unit.constants_offset, 140_000);
        assert_eq!(
            unit.constants[1],
            Object::Function(std::rc::Rc::new(CompiledFunction {
                instructions: Instructions::from(vec![
                    make(Opcode::Constant, vec![0]),
                    make(Opcode::ReturnValue, vec![]),
                ]),
                constants_offset: 140_000,
                num_locals: 0,
                num_parameters: 0,
            }))
        );
        assert_eq!(
            unit.instructions,
            Instructions::from(vec![
                make(Opcode::Constant, vec![1]),
                make(Opcode::ReturnValue, vec![]),
            ])
        );
    }
}
