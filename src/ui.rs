//! Interface de terminal do framefarm: barra de progresso e saída colorida.
//!
//! Usa `indicatif` para a barra de frames e `console` para as cores. O
//! [`JobProgress`] desenha o [`JobStatus`] lido do worker a cada consulta.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::progress::{JobPhase, JobStatus};

/// Indicador visual do andamento de um job no terminal.
pub struct JobProgress {
    // Barra com um passo por frame.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Cria a barra para `total` frames.
    pub fn start(scene: &str, total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames {msg}",
        ) {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb.set_message(format!("{scene}: waiting for providers"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a barra com o status atual.
    pub fn update(&self, status: &JobStatus) {
        self.pb.set_position(status.finished as u64);
        self.pb.set_message(format!(
            "({}%) {} provider(s)",
            status.percent(),
            status.providers
        ));
    }

    /// Finaliza a barra e mostra a fase final do job.
    pub fn complete(&self, status: &JobStatus) {
        self.pb.finish_and_clear();
        match status.phase {
            JobPhase::Completed => println!(
                "  {} All {} frames rendered",
                self.green.apply_to("✓"),
                status.total
            ),
            JobPhase::Incomplete => println!(
                "  {} {} of {} frames rendered, {} outstanding",
                self.yellow.apply_to("!"),
                status.finished,
                status.total,
                status.outstanding()
            ),
            JobPhase::Cancelled => println!(
                "  {} Job cancelled after {} frames",
                self.yellow.apply_to("↯"),
                status.finished
            ),
            JobPhase::Failed(code) => println!(
                "  {} Worker failed ({}): exit code {code}",
                self.red.apply_to("✗"),
                crate::error::FarmError::describe_exit_code(code)
            ),
            JobPhase::Running => {}
        }
    }
}
