//! Interface de terminal do voxqueue — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`ConsoleProgress`] recebe os eventos de
//! progresso dos workers e os exibe no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::queue::{Job, JobStatus};
use crate::sinks::{ProgressEvent, ProgressSink};

/// Indicador visual de progresso para os jobs em execução.
///
/// Exibe um spinner animado durante o processamento e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e retentativa (amarelo).
pub struct ConsoleProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
    // Estilo amarelo para mensagens de retentativa.
    yellow: Style,
}

impl ConsoleProgress {
    /// Inicia o spinner com a mensagem inicial.
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finaliza o spinner.
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl ProgressSink for ConsoleProgress {
    fn emit(&self, event: &ProgressEvent) {
        let job = short_id(&event.job_id);
        match event.status {
            JobStatus::Completed => self.pb.println(format!(
                "  {} {job}: {}",
                self.green.apply_to("✓"),
                event.message
            )),
            JobStatus::Failed => self.pb.println(format!(
                "  {} {job}: {}",
                self.red.apply_to("✗"),
                event.message
            )),
            JobStatus::Retrying => self.pb.println(format!(
                "  {} {job}: {}",
                self.yellow.apply_to("↻"),
                event.message
            )),
            _ => self
                .pb
                .set_message(format!("[{:>3}%] {job}: {}", event.percent, event.message)),
        }
    }
}

// Os 8 primeiros caracteres do UUID bastam para identificar o job na tela.
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Imprime um job formatado em JSON com estilo colorido pelo status.
pub fn print_job(job: &Job) {
    let style = match job.status {
        JobStatus::Completed => Style::new().green().bold(),
        JobStatus::Failed | JobStatus::Cancelled => Style::new().red().bold(),
        _ => Style::new().yellow(),
    };
    println!();
    println!("{}", style.apply_to(format!("─── Job {} ({}) ───", job.id, job.status)));
    println!("{}", serde_json::to_string_pretty(job).unwrap_or_default());
}

/// Imprime qualquer relatório serializável sob um título.
pub fn print_report<T: Serialize>(title: &str, report: &T) {
    println!("{}", Style::new().cyan().bold().apply_to(format!("─── {title} ───")));
    println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates_long_ids() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn console_progress_accepts_every_status() {
        let progress = ConsoleProgress::start("starting");
        for status in JobStatus::ALL {
            progress.emit(&ProgressEvent::new("job-1234567", status, "step", 50));
        }
        progress.finish();
    }
}
