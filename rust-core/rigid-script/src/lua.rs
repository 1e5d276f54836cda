// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lua renderer for script programs.
//
// Every rendered script starts with the same prelude of utility routines so
// that the text of two programs differs only where their bodies differ. Every
// sub-expression is parenthesized; operator precedence never matters.

use crate::ir::{Command, Expr, Program, Stmt, DELIMITER};

const INDENT: &str = "  ";

/// Utility routines shared by every generated script.
pub fn prelude() -> String {
    let doubled = format!("{DELIMITER}{DELIMITER}");
    format!(
        "local function toMap(flat)\n\
         {INDENT}local map = {{}}\n\
         {INDENT}for i = 1, #flat, 2 do map[flat[i]] = flat[i + 1] end\n\
         {INDENT}return map\n\
         end\n\
         local function escape(value)\n\
         {INDENT}return (string.gsub(value, {}, {}))\n\
         end\n\
         local function sortIds(ids)\n\
         {INDENT}table.sort(ids, function(a, b) return tonumber(a) < tonumber(b) end)\n\
         {INDENT}return ids\n\
         end\n",
        quote(DELIMITER),
        quote(&doubled),
    )
}

/// Undo journal used by journaled programs. `write` records what a command
/// is about to overwrite, member by member; `rollback` restores it newest
/// first.
pub const JOURNAL_PRELUDE: &str = r#"local undo = {}
local function write(cmd, key, ...)
  local args = {...}
  if cmd == 'HSET' or cmd == 'HDEL' then
    local step = 1
    if cmd == 'HSET' then step = 2 end
    for i = 1, #args, step do
      table.insert(undo, {'h', key, args[i], redis.call('HGET', key, args[i])})
    end
  elseif cmd == 'SADD' or cmd == 'SREM' then
    for i = 1, #args do
      table.insert(undo, {'s', key, args[i], redis.call('SISMEMBER', key, args[i]) == 1})
    end
  elseif cmd == 'ZADD' or cmd == 'ZREM' then
    local first, step = 1, 1
    if cmd == 'ZADD' then first, step = 2, 2 end
    for i = first, #args, step do
      table.insert(undo, {'z', key, args[i], redis.call('ZSCORE', key, args[i])})
    end
  elseif cmd == 'DEL' then
    local kind = redis.call('TYPE', key)['ok']
    if kind == 'hash' then
      local flat = redis.call('HGETALL', key)
      for i = 1, #flat, 2 do table.insert(undo, {'h', key, flat[i], flat[i + 1]}) end
    elseif kind == 'set' then
      for _, member in ipairs(redis.call('SMEMBERS', key)) do
        table.insert(undo, {'s', key, member, true})
      end
    elseif kind == 'zset' then
      local flat = redis.call('ZRANGE', key, 0, -1, 'WITHSCORES')
      for i = 1, #flat, 2 do table.insert(undo, {'z', key, flat[i], flat[i + 1]}) end
    elseif kind == 'string' then
      table.insert(undo, {'k', key, false, redis.call('GET', key)})
    end
  elseif cmd == 'SET' then
    table.insert(undo, {'k', key, false, redis.call('GET', key)})
  end
  return redis.call(cmd, key, ...)
end
local function rollback()
  for i = #undo, 1, -1 do
    local kind, key, member, old = undo[i][1], undo[i][2], undo[i][3], undo[i][4]
    if kind == 'h' then
      if old then redis.call('HSET', key, member, old) else redis.call('HDEL', key, member) end
    elseif kind == 's' then
      if old then redis.call('SADD', key, member) else redis.call('SREM', key, member) end
    elseif kind == 'z' then
      if old then redis.call('ZADD', key, old, member) else redis.call('ZREM', key, member) end
    elseif old then
      redis.call('SET', key, old)
    else
      redis.call('DEL', key)
    end
  end
end
"#;

/// Render a program, prelude included.
pub fn render(program: &Program) -> String {
    let mut renderer = Renderer {
        out: prelude(),
        journal: program.journal,
    };
    if program.journal {
        renderer.out.push_str(JOURNAL_PRELUDE);
    }
    renderer.block(&program.body, 0);
    renderer.out
}

struct Renderer {
    out: String,
    journal: bool,
}

impl Renderer {
    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn block(&mut self, stmts: &[Stmt], depth: usize) {
        for stmt in stmts {
            self.stmt(stmt, depth);
        }
    }

    fn stmt(&mut self, stmt: &Stmt, depth: usize) {
        match stmt {
            Stmt::Local { name, value } => {
                let text = format!("local {name} = {}", self.expr(value));
                self.line(depth, &text);
            }
            Stmt::Assign { name, value } => {
                let text = format!("{name} = {}", self.expr(value));
                self.line(depth, &text);
            }
            Stmt::SetField { map, field, value } => {
                let text = format!("{map}[{}] = {}", quote(field), self.expr(value));
                self.line(depth, &text);
            }
            Stmt::Push { list, value } => {
                let text = format!("table.insert({list}, {})", self.expr(value));
                self.line(depth, &text);
            }
            Stmt::Call { command, args } => {
                let text = self.call(*command, args);
                self.line(depth, &text);
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let text = format!("if {} then", self.expr(cond));
                self.line(depth, &text);
                self.block(then, depth + 1);
                if !otherwise.is_empty() {
                    self.line(depth, "else");
                    self.block(otherwise, depth + 1);
                }
                self.line(depth, "end");
            }
            Stmt::Return(value) => {
                let text = format!("return {}", self.expr(value));
                self.line(depth, &text);
            }
            Stmt::Abort(value) if self.journal => {
                let text = format!("local aborted = {}", self.expr(value));
                self.line(depth, &text);
                self.line(depth, "rollback()");
                self.line(depth, "return aborted");
            }
            Stmt::Abort(value) => {
                let text = format!("return {}", self.expr(value));
                self.line(depth, &text);
            }
            Stmt::Block(inner) => {
                self.line(depth, "do");
                self.block(inner, depth + 1);
                self.line(depth, "end");
            }
        }
    }

    fn call(&self, command: Command, args: &[Expr]) -> String {
        let mut parts = vec![quote(command.name())];
        parts.extend(args.iter().map(|arg| self.expr(arg)));
        if self.journal && command.is_journaled() {
            format!("write({})", parts.join(", "))
        } else {
            format!("redis.call({})", parts.join(", "))
        }
    }

    fn join(&self, items: &[Expr], op: &str) -> String {
        let rendered: Vec<String> = items.iter().map(|item| self.expr(item)).collect();
        format!("({})", rendered.join(op))
    }

    fn expr(&self, e: &Expr) -> String {
        match e {
            Expr::Nil => "nil".to_string(),
            Expr::Str(s) => quote(s),
            Expr::Int(i) => i.to_string(),
            Expr::Param(n) => format!("ARGV[{n}]"),
            Expr::Var(name) => name.clone(),
            Expr::Field { map, field } => format!("{map}[{}]", quote(field)),
            Expr::Index { list, index } => format!("({})[{index}]", self.expr(list)),
            Expr::Concat(parts) => self.join(parts, " .. "),
            Expr::Lower(inner) => format!("string.lower({})", self.expr(inner)),
            Expr::Escape(inner) => format!("escape({})", self.expr(inner)),
            Expr::ToMap(inner) => format!("toMap({})", self.expr(inner)),
            Expr::SortIds(inner) => format!("sortIds({})", self.expr(inner)),
            Expr::Call { command, args } => self.call(*command, args),
            Expr::Table(items) => {
                let rendered: Vec<String> = items.iter().map(|item| self.expr(item)).collect();
                format!("{{{}}}", rendered.join(", "))
            }
            Expr::Len(inner) => format!("#{}", self.expr(inner)),
            Expr::Eq(a, b) => format!("({} == {})", self.expr(a), self.expr(b)),
            Expr::Ne(a, b) => format!("({} ~= {})", self.expr(a), self.expr(b)),
            Expr::Gt(a, b) => format!("({} > {})", self.expr(a), self.expr(b)),
            Expr::And(items) => self.join(items, " and "),
            Expr::Or(items) => self.join(items, " or "),
            Expr::Not(inner) => format!("(not {})", self.expr(inner)),
        }
    }
}

/// Quote a string as a Lua literal.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes_specials() {
        assert_eq!(quote("car"), "'car'");
        assert_eq!(quote("it's"), "'it\\'s'");
        assert_eq!(quote("a\\b"), "'a\\\\b'");
        assert_eq!(quote("x\ny"), "'x\\ny'");
    }

    #[test]
    fn test_render_statements() {
        let program = Program::new(vec![
            Stmt::local("ret", Expr::Table(vec![Expr::str("none"), Expr::str("noError")])),
            Stmt::Block(vec![
                Stmt::local("key", Expr::concat(vec![Expr::str("p:car:"), Expr::Param(1)])),
                Stmt::when(
                    Expr::call(Command::Exists, vec![Expr::var("key")]).equals(Expr::Int(0)),
                    vec![Stmt::Return(Expr::Table(vec![
                        Expr::str("get"),
                        Expr::str("notFound"),
                    ]))],
                ),
                Stmt::assign(
                    "ret",
                    Expr::Table(vec![
                        Expr::str("get"),
                        Expr::str("noError"),
                        Expr::call(Command::HGetAll, vec![Expr::var("key")]),
                    ]),
                ),
            ]),
            Stmt::Return(Expr::var("ret")),
        ]);

        let text = render(&program);
        assert!(text.starts_with("local function toMap(flat)"));
        assert!(text.contains("local ret = {'none', 'noError'}\n"));
        assert!(text.contains("  local key = ('p:car:' .. ARGV[1])\n"));
        assert!(text.contains("  if (redis.call('EXISTS', key) == 0) then\n"));
        assert!(text.contains("    return {'get', 'notFound'}\n"));
        assert!(text.contains("  ret = {'get', 'noError', redis.call('HGETALL', key)}\n"));
        assert!(text.ends_with("end\nreturn ret\n"));
    }

    #[test]
    fn test_render_else_branch_and_utilities() {
        let program = Program::new(vec![Stmt::if_else(
            Expr::And(vec![
                Expr::field("rec", "color").not_equals(Expr::str("~")),
                Expr::var("holder").negate(),
            ]),
            vec![Stmt::push("conflicts", Expr::str("u"))],
            vec![Stmt::set_field(
                "rec",
                "color",
                Expr::field("rec", "color").lower().escape(),
            )],
        )]);

        let text = render(&program);
        assert!(text.contains("if ((rec['color'] ~= '~') and (not holder)) then\n"));
        assert!(text.contains("  table.insert(conflicts, 'u')\n"));
        assert!(text.contains("else\n  rec['color'] = escape(string.lower(rec['color']))\n"));
    }

    #[test]
    fn test_journaled_writes_and_abort() {
        let abort = Stmt::when(
            Expr::var("conflicts").length().greater_than(Expr::Int(0)),
            vec![Stmt::Abort(Expr::Table(vec![
                Expr::str("create"),
                Expr::str("notUnique"),
            ]))],
        );
        let body = vec![
            Stmt::local("id", Expr::call(Command::Incr, vec![Expr::str("p:car:nextid")])),
            Stmt::call(Command::HSet, vec![Expr::str("p:car:1"), Expr::str("color"), Expr::Param(1)]),
            abort,
        ];

        let text = render(&Program::journaled(body.clone()));
        assert!(text.contains("local function rollback()"));
        assert!(text.contains("local id = redis.call('INCR', 'p:car:nextid')\n"));
        assert!(text.contains("write('HSET', 'p:car:1', 'color', ARGV[1])\n"));
        assert!(text.contains(
            "  local aborted = {'create', 'notUnique'}\n  rollback()\n  return aborted\n"
        ));

        let plain = render(&Program::new(body));
        assert!(!plain.contains("rollback"));
        assert!(plain.contains("redis.call('HSET', 'p:car:1', 'color', ARGV[1])"));
        assert!(plain.contains("  return {'create', 'notUnique'}\n"));
    }

    #[test]
    fn test_prelude_escape_doubles_delimiter() {
        let text = prelude();
        assert!(text.contains("string.gsub(value, ':', '::')"));
    }
}
