/// A code generator. It builds up the text of one generated C++ file.
pub struct CodeGen {
  current:      String,
  // Indent level (not amount of spaces)
  indent:       usize,
  // Indent is added when we write a new line, not on write_line
  needs_indent: bool,
}

impl CodeGen {
  #[allow(clippy::new_without_default)]
  pub fn new() -> Self {
    CodeGen { current: String::new(), indent: 0, needs_indent: false }
  }
  /// Returns the current indent of this generator.
  pub fn indent(&self) -> usize { self.indent }

  /// Writes a block of code, with the opening brace on the current line.
  /// Example:
  /// ```
  /// # use pk_gen::gen::CodeGen;
  /// # let mut gen = CodeGen::new();
  /// gen.write("if (differ) ");
  /// gen.write_block(|gen| {
  ///   gen.write_line("different++;");
  /// });
  /// # let out = gen.into_output();
  /// # assert_eq!(out,
  /// # r#"if (differ) {
  /// #   different++;
  /// # }
  /// # "#);
  /// ```
  /// That will produce:
  /// ```c
  /// if (differ) {
  ///   different++;
  /// }
  /// ```
  pub fn write_block<F>(&mut self, write_block: F)
  where
    F: FnOnce(&mut CodeGen),
  {
    self.write_line("{");
    self.add_indent();
    write_block(self);
    self.remove_indent();
    self.write_line("}");
  }

  /// Writes a function definition in the emitted dialect: the signature on
  /// its own line, the opening brace on the next, and a blank line after the
  /// closing brace. Example:
  /// ```
  /// # use pk_gen::gen::CodeGen;
  /// # let mut gen = CodeGen::new();
  /// gen.write_func("static int send_foo(struct connection *pc)", |gen| {
  ///   gen.write_line("return 0;");
  /// });
  /// # let out = gen.into_output();
  /// # assert_eq!(out,
  /// # r#"static int send_foo(struct connection *pc)
  /// # {
  /// #   return 0;
  /// # }
  /// #
  /// # "#);
  /// ```
  pub fn write_func<F>(&mut self, signature: &str, write_body: F)
  where
    F: FnOnce(&mut CodeGen),
  {
    self.write_line(signature);
    self.write_line("{");
    self.add_indent();
    write_body(self);
    self.remove_indent();
    self.write_line("}");
    self.write_line("");
  }

  /// Writes a block comment in the emitted dialect.
  pub fn write_comment(&mut self, text: &str) {
    self.write("/* ");
    self.write(text);
    self.write_line(" */");
  }

  /// Writes a multi-line fragment, indenting every line. Emitters build small
  /// per-field fragments with `format!` and hand them over here.
  pub fn write_lines(&mut self, src: &str) {
    for line in src.split('\n') {
      if line.is_empty() {
        self.write_line("");
      } else {
        self.write_line(line);
      }
    }
  }

  pub fn write(&mut self, src: &str) {
    // Make sure not to indent when we aren't writing anything
    if src.is_empty() {
      return;
    }
    if self.needs_indent {
      self.current.push_str(&"  ".repeat(self.indent));
      self.needs_indent = false;
    }
    self.current.push_str(src);
  }
  pub fn write_line(&mut self, src: &str) {
    if src.is_empty() {
      self.current.push('\n');
      self.needs_indent = true;
    } else {
      self.write(src);
      self.current.push('\n');
      self.needs_indent = true;
    }
  }
  /// Adds a new indent level to the generator.
  pub fn add_indent(&mut self) { self.indent = self.indent.checked_add(1).unwrap(); }
  /// Removes a level of indent from the generator.
  pub fn remove_indent(&mut self) { self.indent = self.indent.checked_sub(1).unwrap(); }
  /// Returns the code that was generated with this generator.
  pub fn into_output(self) -> String { self.current }
}

use std::fmt;
impl fmt::Debug for CodeGen {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { f.debug_struct("CodeGen").finish() }
}
