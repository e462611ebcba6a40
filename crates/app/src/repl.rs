//! Line-oriented front end for a running session.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use assess_core::model::{AggregateResult, Language, Verdict};
use assess_core::time::{format_countdown, is_low_time};
use services::{ActiveSession, SessionError, SessionObserver, SessionPhase};

/// Prints session events as they happen.
#[derive(Debug, Default)]
pub struct TerminalObserver {
    warned_low_time: AtomicBool,
}

impl SessionObserver for TerminalObserver {
    fn on_tick(&self, remaining_seconds: u64) {
        if is_low_time(remaining_seconds) && !self.warned_low_time.swap(true, Ordering::SeqCst) {
            println!("\n!! {} left", format_countdown(remaining_seconds));
        }
    }

    fn on_expired(&self) {
        println!("\nTime is up. Submitting your work...");
    }

    fn on_finalized(&self, result: &AggregateResult) {
        print_result(result);
    }

    fn on_aborted(&self) {
        println!("Session abandoned. Nothing was submitted.");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    Time,
    Next,
    Prev,
    Goto(usize),
    Show,
    Edit,
    Lang(String),
    Run,
    Check,
    Submit,
    Exit,
    Quit,
    Help,
    Empty,
    Unknown(String),
}

impl ReplCommand {
    fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Self::Empty;
        };
        let rest = words.collect::<Vec<_>>().join(" ");
        match head {
            "time" | "t" => Self::Time,
            "next" | "n" => Self::Next,
            "prev" | "p" => Self::Prev,
            "goto" | "g" => match rest.parse::<usize>() {
                Ok(number) if number > 0 => Self::Goto(number - 1),
                _ => Self::Unknown(line.trim().to_owned()),
            },
            "show" | "s" => Self::Show,
            "edit" | "e" => Self::Edit,
            "lang" => Self::Lang(rest),
            "run" | "r" => Self::Run,
            "check" => Self::Check,
            "submit" => Self::Submit,
            "exit" => Self::Exit,
            "quit" | "q" => Self::Quit,
            "help" | "?" => Self::Help,
            _ => Self::Unknown(line.trim().to_owned()),
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  time             remaining time");
    println!("  next | prev      move between problems");
    println!("  goto <n>         jump to problem n");
    println!("  show             current problem and draft");
    println!("  edit             replace the draft (finish with a line containing only '.')");
    println!("  lang <name>      python3 | javascript | java | cpp");
    println!("  run              run the draft without grading");
    println!("  check            grade the draft (practice only)");
    println!("  submit           finish and submit the session");
    println!("  exit             abandon the session without submitting");
    println!("  quit             leave; the session keeps running and can be resumed");
}

fn print_verdict(verdict: &Verdict) {
    if verdict.total_tests() > 0 {
        println!(
            "{}/{} tests passed{}",
            verdict.passed_tests(),
            verdict.total_tests(),
            if verdict.is_full_pass() { " ✓" } else { "" }
        );
    }
    if let Some(error) = verdict.error() {
        println!("error: {error}");
    } else if let Some(output) = verdict.output() {
        println!("{output}");
    }
    for (i, case) in verdict.test_cases().iter().enumerate() {
        let mark = if case.passed { "pass" } else { "FAIL" };
        println!("  case {}: {mark}", i + 1);
        if !case.passed {
            if let Some(expected) = &case.expected_output {
                println!("    expected: {expected}");
            }
            if let Some(actual) = &case.actual_output {
                println!("    actual:   {actual}");
            }
        }
    }
}

fn print_result(result: &AggregateResult) {
    println!("\nScore: {}%", result.score_percent());
    for line in result.per_problem() {
        let mark = if line.passed { "passed" } else { "failed" };
        println!(
            "  {:<32} {mark} ({}/{})",
            line.problem_title, line.passed_tests, line.total_tests
        );
    }
}

fn print_header(session: &ActiveSession) {
    let index = session.current_problem_index();
    if let Some(problem) = session.current_problem() {
        let difficulty = problem
            .difficulty
            .map(|d| format!(" [{d:?}]"))
            .unwrap_or_default();
        println!(
            "\nProblem {}/{}: {}{difficulty}   ({} left, {})",
            index + 1,
            session.problems().len(),
            problem.title,
            format_countdown(session.remaining_seconds()),
            session.language()
        );
    }
}

async fn read_block<R: AsyncBufRead + Unpin>(input: &mut Lines<R>) -> std::io::Result<String> {
    let mut code = Vec::new();
    while let Some(line) = input.next_line().await? {
        if line == "." {
            break;
        }
        code.push(line);
    }
    Ok(code.join("\n"))
}

async fn confirm<R: AsyncBufRead + Unpin>(
    input: &mut Lines<R>,
    question: &str,
) -> std::io::Result<bool> {
    println!("{question} [yes/no]");
    let answer = input.next_line().await?.unwrap_or_default();
    Ok(matches!(answer.trim(), "yes" | "y"))
}

const RETRY_HINT: &str =
    "Your answers were scored but not recorded. Type 'submit' to retry or 'exit' to abandon.";

/// Report a command failure. Returns false when the session can no longer
/// accept commands.
fn report(session: &ActiveSession, err: &SessionError) -> bool {
    match err {
        SessionError::NotActive { phase } if !session.awaiting_retry() => {
            println!("The session is {phase}.");
        }
        _ => println!("{err}"),
    }
    if session.awaiting_retry() {
        println!("{RETRY_HINT}");
        return true;
    }
    !session.phase().is_terminal()
}

async fn dispatch<R: AsyncBufRead + Unpin>(
    session: &ActiveSession,
    input: &mut Lines<R>,
    command: ReplCommand,
) -> std::io::Result<bool> {
    let index = session.current_problem_index();
    let outcome: Result<(), SessionError> = match command {
        ReplCommand::Empty => Ok(()),
        ReplCommand::Help => {
            print_help();
            Ok(())
        }
        ReplCommand::Time => {
            println!("{} left", format_countdown(session.remaining_seconds()));
            Ok(())
        }
        ReplCommand::Next => session.next_problem().await.map(|_| print_header(session)),
        ReplCommand::Prev => session.previous_problem().await.map(|_| print_header(session)),
        ReplCommand::Goto(target) => session.go_to_problem(target).await.map(|()| print_header(session)),
        ReplCommand::Show => {
            print_header(session);
            session.get_draft_code(index).await.map(|code| {
                if code.is_empty() {
                    println!("(no draft yet; type 'edit')");
                } else {
                    println!("{code}");
                }
            })
        }
        ReplCommand::Edit => {
            println!("Enter code; finish with '.' on its own line.");
            let code = read_block(input).await?;
            session.set_draft_code(index, &code).await
        }
        ReplCommand::Lang(name) => match name.parse::<Language>() {
            Ok(language) => session.set_language(language).await,
            Err(err) => {
                println!("{err}");
                Ok(())
            }
        },
        ReplCommand::Run => match session.get_draft_code(index).await {
            Ok(code) => session
                .run_current(&code, session.language())
                .await
                .map(|verdict| print_verdict(&verdict)),
            Err(err) => Err(err),
        },
        ReplCommand::Check => match session.get_draft_code(index).await {
            Ok(code) => session
                .check_current(&code)
                .await
                .map(|verdict| print_verdict(&verdict)),
            Err(err) => Err(err),
        },
        ReplCommand::Submit => {
            if confirm(input, "Submit all problems now?").await? {
                // The observer prints the score.
                session.submit().await.map(|_| ())
            } else {
                Ok(())
            }
        }
        ReplCommand::Exit => {
            if confirm(input, "Abandon this session? Nothing will be submitted.").await? {
                session.exit().await
            } else {
                Ok(())
            }
        }
        ReplCommand::Quit => {
            println!("Leaving. The countdown keeps running; use 'resume' to come back.");
            return Ok(false);
        }
        ReplCommand::Unknown(raw) => {
            println!("unknown command: {raw} (type 'help')");
            Ok(())
        }
    };

    Ok(match outcome {
        Ok(()) => !session.phase().is_terminal(),
        Err(err) => report(session, &err),
    })
}

/// Drive `session` from standard input until it ends or the user quits.
///
/// # Errors
///
/// Returns an error if standard input cannot be read.
pub async fn interact(session: ActiveSession) -> Result<(), Box<dyn std::error::Error>> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    print_header(&session);
    if session.awaiting_retry() {
        println!("{RETRY_HINT}");
    }
    println!("Type 'help' for commands.");

    loop {
        if session.phase().is_terminal() {
            break;
        }
        let line = if session.awaiting_retry() || session.phase() == SessionPhase::Active {
            tokio::select! {
                line = input.next_line() => line?,
                phase = session.settled(), if !session.awaiting_retry() => {
                    tracing::debug!(%phase, "session settled while waiting for input");
                    continue;
                }
            }
        } else {
            // An automatic finalize is running.
            session.settled().await;
            continue;
        };

        let Some(line) = line else {
            break;
        };
        if !dispatch(&session, &mut input, ReplCommand::parse(&line)).await? {
            break;
        }
    }

    if session.phase() == SessionPhase::Finalizing && !session.awaiting_retry() {
        session.settled().await;
    }
    Ok(())
}
