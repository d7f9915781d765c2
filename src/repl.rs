use std::io::{self, BufRead, Write};

use snippet_kernel::{EvalReply, KernelError, Repl};

const CELL_SEPARATOR: &str = "%%";

/// Reads one snippet per line until end of input.
pub fn start(repl: &Repl) -> io::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!(">>");
        io::stdout().flush()?;

        let Some(input) = lines.next().transpose()? else {
            println!();
            return Ok(());
        };
        if input.trim().is_empty() {
            continue;
        }

        print_outcome(repl.eval(&input));
    }
}

/// Evaluates every cell of `source` in order. A failing cell is reported and
/// the next one still runs.
pub fn run_cells(repl: &Repl, source: &str) {
    for cell in split_cells(source) {
        print_outcome(repl.eval(&cell));
    }
}

fn split_cells(source: &str) -> Vec<String> {
    let mut cells = vec![];
    let mut current = String::new();
    for line in source.lines() {
        if line.trim() == CELL_SEPARATOR {
            cells.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    cells.push(current);
    cells.retain(|cell| !cell.trim().is_empty());
    cells
}

fn print_outcome(outcome: Result<EvalReply, KernelError>) {
    match outcome {
        Ok(EvalReply {
            rendered: Some(value),
            ..
        }) => println!("{}", value),
        Ok(_) => {}
        Err(err) => {
            println!("Woops! We ran into some trouble here!");
            match err {
                KernelError::Compilation { diagnostics, .. } => {
                    for diagnostic in diagnostics.iter() {
                        println!("{}", diagnostic);
                    }
                }
                KernelError::RendererFailure { .. } => println!("render error: {}", err),
                err => println!("eval error: {}", err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_cells() {
        let tests = vec![
            ("1", vec!["1\n"]),
            ("let a = 1;\n%%\na\n", vec!["let a = 1;\n", "a\n"]),
            ("%%\n\n%%\n1\n  %%  \n", vec!["1\n"]),
            ("", vec![]),
        ];

        for (source, expected) in tests {
            assert_eq!(split_cells(source), expected, "{source:?}");
        }
    }
}
