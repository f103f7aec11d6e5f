//! Configuração de um job de renderização.
//!
//! [`JobSettings`] reúne os parâmetros ajustáveis (orçamento, preços, timeouts,
//! recursos, formato) e é carregada de `framefarm.toml`, com defaults sensíveis
//! para tudo que não estiver no arquivo. [`JobConfig`] acrescenta o que é
//! específico de um job (cena, diretórios, frames) e é imutável durante o job.
//! A variável de ambiente `YAGNA_APPKEY` tem precedência sobre o arquivo.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FarmError;
use crate::policy::PriceLimits;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "framefarm.toml";

/// Variável de ambiente com a app key do gateway do marketplace.
pub const APP_KEY_ENV: &str = "YAGNA_APPKEY";

/// Formato de imagem produzido para cada frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputFormat {
    #[default]
    Png,
    Bmp,
    Jpeg,
    OpenExr,
    OpenExrMultilayer,
}

impl OutputFormat {
    /// Nome do formato como o renderizador remoto espera em `-F`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Png => "PNG",
            OutputFormat::Bmp => "BMP",
            OutputFormat::Jpeg => "JPEG",
            OutputFormat::OpenExr => "OPEN_EXR",
            OutputFormat::OpenExrMultilayer => "OPEN_EXR_MULTILAYER",
        }
    }

    /// Extensão do arquivo de saída: `exr` para as duas variantes EXR,
    /// nome do formato em minúsculas para o resto.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Bmp => "bmp",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::OpenExr | OutputFormat::OpenExrMultilayer => "exr",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rede de liquidação usada para pagar os provedores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Goerli,
    #[default]
    Mumbai,
    Polygon,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Goerli => "goerli",
            Network::Mumbai => "mumbai",
            Network::Polygon => "polygon",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tetos de preço informados por hora.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceCaps {
    /// Preço fixo máximo por atividade.
    pub fixed_per_hour: f64,
    /// Preço máximo por hora de CPU.
    pub cpu_per_hour: f64,
    /// Preço máximo por hora de relógio.
    pub duration_per_hour: f64,
}

impl PriceCaps {
    /// Converte os três tetos para moeda por segundo.
    pub fn per_second(&self) -> PriceLimits {
        PriceLimits {
            fixed: self.fixed_per_hour / 3600.0,
            cpu_per_sec: self.cpu_per_hour / 3600.0,
            duration_per_sec: self.duration_per_hour / 3600.0,
        }
    }
}

/// Limites de tempo do job e de cada pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Prazo global do job, em horas.
    pub global_hours: u64,
    /// Tempo máximo de upload do arquivo, em minutos.
    pub upload_minutes: u64,
    /// Tempo máximo de renderização de um frame, em minutos.
    pub render_minutes: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            global_hours: 4,
            upload_minutes: 10,
            render_minutes: 10,
        }
    }
}

impl Timeouts {
    /// Maior prazo global aceito, em horas.
    pub const MAX_GLOBAL_HOURS: u64 = 24;
    /// Maior limite de upload ou de render aceito, em minutos.
    pub const MAX_STAGE_MINUTES: u64 = 59;

    pub fn global(&self) -> Duration {
        Duration::from_secs(self.global_hours.saturating_mul(3600))
    }

    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload_minutes.saturating_mul(60))
    }

    pub fn render(&self) -> Duration {
        Duration::from_secs(self.render_minutes.saturating_mul(60))
    }

    /// Limite da primeira atribuição de uma atividade (upload + render).
    pub fn first_assignment(&self) -> Duration {
        self.upload().saturating_add(self.render())
    }
}

/// Requisitos de recursos e concorrência.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    /// Máximo de pipelines simultâneos.
    pub workers: usize,
    pub memory_gib: u32,
    pub storage_gib: u32,
    pub threads: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            workers: 1,
            memory_gib: 8,
            storage_gib: 8,
            threads: 8,
        }
    }
}

/// Conexão com o gateway do marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    /// URL base do gateway REST.
    pub gateway_url: String,
    /// App key usada como bearer token.
    pub app_key: String,
    pub subnet_tag: String,
    pub payment_driver: String,
    /// Intervalo entre consultas de ofertas quando nenhum provedor está elegível.
    pub offer_poll_secs: u64,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:7465".to_string(),
            app_key: String::new(),
            subnet_tag: "public".to_string(),
            payment_driver: "erc20".to_string(),
            offer_poll_secs: 5,
        }
    }
}

impl MarketSettings {
    pub fn offer_poll(&self) -> Duration {
        Duration::from_secs(self.offer_poll_secs.max(1))
    }
}

/// Parâmetros ajustáveis carregados de `framefarm.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub network: Network,
    /// Teto de gasto da sessão.
    pub budget: f64,
    pub prices: PriceCaps,
    pub timeouts: Timeouts,
    pub resources: Resources,
    pub format: OutputFormat,
    pub market: MarketSettings,
    /// Máximo de tentativas por frame; `None` retenta até o prazo global.
    pub max_attempts: Option<u32>,
}

// Valor padrão para o orçamento: 10.
fn default_budget() -> f64 {
    10.0
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            network: Network::default(),
            budget: default_budget(),
            prices: PriceCaps::default(),
            timeouts: Timeouts::default(),
            resources: Resources::default(),
            format: OutputFormat::default(),
            market: MarketSettings::default(),
            max_attempts: None,
        }
    }
}

impl JobSettings {
    /// Carrega as configurações de `path`, ou de `framefarm.toml` no diretório
    /// atual. Usa valores padrão se nenhum arquivo existir.
    pub fn load(path: Option<&Path>) -> Result<Self, FarmError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE).exists() => Self::from_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };

        // Variável de ambiente tem precedência sobre o arquivo para a app key.
        if let Ok(key) = std::env::var(APP_KEY_ENV) {
            if !key.is_empty() {
                settings.market.app_key = key;
            }
        }

        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self, FarmError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<JobSettings>(&contents)?)
    }
}

/// Configuração completa de um job, repassada ao processo worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "new_job_id")]
    pub job_id: String,
    /// Nome da cena, sem a extensão `.blend`.
    pub scene: String,
    pub project_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Frames a renderizar, não necessariamente contíguos.
    pub frames: Vec<u32>,
    #[serde(flatten)]
    pub settings: JobSettings,
}

fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

impl JobConfig {
    pub fn new(
        scene: impl Into<String>,
        project_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        frames: Vec<u32>,
        settings: JobSettings,
    ) -> Self {
        Self {
            job_id: new_job_id(),
            scene: scene.into(),
            project_dir: project_dir.into(),
            output_dir: output_dir.into(),
            frames,
            settings,
        }
    }

    /// Caminho do arquivo com o projeto empacotado.
    pub fn archive_path(&self) -> PathBuf {
        self.output_dir.join("archive.zip")
    }

    /// Caminho do log da sessão, gravado junto com os frames.
    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join("requestor.log")
    }

    /// Relatório JSON gravado pelo worker ao fim do job.
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join("report.json")
    }

    /// Valida a configuração antes de qualquer trabalho remoto.
    pub fn validate(&self) -> Result<(), FarmError> {
        if self.scene.trim().is_empty() {
            return Err(FarmError::Configuration("scene name must not be empty".into()));
        }
        let settings = &self.settings;
        if settings.resources.workers == 0 {
            return Err(FarmError::Configuration("workers must be at least 1".into()));
        }
        if settings.budget.is_nan() || settings.budget <= 0.0 {
            return Err(FarmError::Configuration(format!(
                "budget must be positive, got {}",
                settings.budget
            )));
        }
        let t = &settings.timeouts;
        if t.global_hours == 0 || t.upload_minutes == 0 || t.render_minutes == 0 {
            return Err(FarmError::Configuration("timeouts must be positive".into()));
        }
        if t.global_hours > Timeouts::MAX_GLOBAL_HOURS {
            return Err(FarmError::Configuration(format!(
                "global timeout must be at most {} hours, got {}",
                Timeouts::MAX_GLOBAL_HOURS,
                t.global_hours
            )));
        }
        if t.upload_minutes > Timeouts::MAX_STAGE_MINUTES
            || t.render_minutes > Timeouts::MAX_STAGE_MINUTES
        {
            return Err(FarmError::Configuration(format!(
                "upload and render timeouts must be at most {} minutes",
                Timeouts::MAX_STAGE_MINUTES
            )));
        }
        check_output_location(&self.project_dir, &self.output_dir)
    }
}

/// Rejeita um diretório de saída igual ao projeto, dentro dele, ou que o contenha.
pub fn check_output_location(project_dir: &Path, output_dir: &Path) -> Result<(), FarmError> {
    let project = normalize(project_dir);
    let output = normalize(output_dir);

    if output.starts_with(&project) {
        return Err(FarmError::Configuration(format!(
            "output directory {} must be outside project directory {}",
            output.display(),
            project.display()
        )));
    }
    if project.starts_with(&output) {
        return Err(FarmError::Configuration(format!(
            "output directory {} must not contain project directory {}",
            output.display(),
            project.display()
        )));
    }
    Ok(())
}

// Caminho absoluto com symlinks resolvidos até o ancestral mais próximo que existe.
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut tail = Vec::new();
    let mut cursor = absolute.as_path();
    loop {
        if let Ok(found) = cursor.canonicalize() {
            return tail.iter().rev().fold(found, |acc, part| acc.join(part));
        }
        match (cursor.parent(), cursor.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                cursor = parent;
            }
            _ => return absolute,
        }
    }
}
