//! Command-line interface definitions.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Secrets and the proxy can also come from environment variables.

use crate::config::Config;
use crate::error::ConfigError;
use clap::Parser;

/// Command-line arguments for the article translator.
///
/// Without `--config` every setting comes from these flags. With `--config`
/// the YAML file is authoritative, and only the secrets and proxy it leaves
/// out are taken from flags or the environment.
///
/// # Examples
///
/// ```sh
/// # Translate every URL in urls.txt into Chinese with the free backend
/// article_translator
///
/// # Rewrite into English with DeepSeek through a local proxy
/// article_translator -i list.txt -l en -b deepseek --rewrite -p http://127.0.0.1:7890
///
/// # Everything from a config file
/// article_translator -c config.yaml
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long)]
    pub config: Option<String>,

    /// File with one URL per line
    #[arg(short, long, default_value = "urls.txt")]
    pub input: String,

    /// Output directory for rendered pages
    #[arg(short, long, default_value = "output")]
    pub outdir: String,

    /// Source language code, or `auto`
    #[arg(short, long, default_value = "auto")]
    pub source: String,

    /// Target language code
    #[arg(short, long, default_value = "zh")]
    pub lang: String,

    /// Translation backend: simple, mymemory, google, deepl, openai or deepseek
    #[arg(short, long, default_value = "simple")]
    pub backend: String,

    /// Rewrite and polish instead of translating literally (LLM backends)
    #[arg(long)]
    pub rewrite: bool,

    /// HTTP or SOCKS proxy URL
    #[arg(short, long, env = "HTTPS_PROXY")]
    pub proxy: Option<String>,

    /// Maximum URLs processed at once
    #[arg(long, default_value_t = 6)]
    pub concurrency: usize,

    /// Page request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Ignore and do not write the idempotency cache
    #[arg(long)]
    pub no_cache: bool,

    /// Maximum characters per translation chunk
    #[arg(long, default_value_t = 2000)]
    pub chunk_size: usize,

    /// Total fetch attempts per URL
    #[arg(long, default_value_t = 3)]
    pub max_retries: usize,

    /// Save raw markup of pages whose extraction came up short
    #[arg(long)]
    pub debug_dump: bool,

    /// DeepL API key
    #[arg(long, env = "DEEPL_API_KEY", hide_env_values = true)]
    pub deepl_api_key: Option<String>,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// DeepSeek API key
    #[arg(long, env = "DEEPSEEK_API_KEY", hide_env_values = true)]
    pub deepseek_api_key: Option<String>,
}

impl Cli {
    /// Resolve the effective, validated configuration.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let Cli {
            config: config_path,
            input,
            outdir,
            source,
            lang,
            backend,
            rewrite,
            proxy,
            concurrency,
            timeout,
            no_cache,
            chunk_size,
            max_retries,
            debug_dump,
            deepl_api_key,
            openai_api_key,
            deepseek_api_key,
        } = self;

        let mut config = match config_path {
            Some(path) => {
                let mut config = Config::from_yaml(&path)?;
                config.deepl_api_key = config.deepl_api_key.or(deepl_api_key);
                config.openai_api_key = config.openai_api_key.or(openai_api_key);
                config.deepseek_api_key = config.deepseek_api_key.or(deepseek_api_key);
                config.proxy = config.proxy.or(proxy);
                config
            }
            None => Config {
                urls_file: input,
                output_dir: outdir,
                source_lang: source,
                target_lang: lang,
                backend,
                rewrite_mode: rewrite,
                proxy,
                max_concurrency: concurrency,
                timeout,
                use_cache: !no_cache,
                chunk_size,
                max_retries,
                debug_dump,
                deepl_api_key,
                openai_api_key,
                deepseek_api_key,
                ..Config::default()
            },
        };
        config.fill_credentials_from_env();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["article_translator"]);

        assert_eq!(cli.input, "urls.txt");
        assert_eq!(cli.outdir, "output");
        assert_eq!(cli.source, "auto");
        assert_eq!(cli.lang, "zh");
        assert_eq!(cli.backend, "simple");
        assert_eq!(cli.concurrency, 6);
        assert_eq!(cli.timeout, 30);
        assert_eq!(cli.chunk_size, 2000);
        assert_eq!(cli.max_retries, 3);
        assert!(!cli.rewrite && !cli.no_cache && !cli.debug_dump);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from([
            "article_translator",
            "-i",
            "list.txt",
            "-o",
            "/tmp/out",
            "-s",
            "en",
            "-l",
            "ja",
            "-b",
            "deepseek",
            "-p",
            "socks5://127.0.0.1:1080",
        ]);

        assert_eq!(cli.input, "list.txt");
        assert_eq!(cli.outdir, "/tmp/out");
        assert_eq!(cli.source, "en");
        assert_eq!(cli.lang, "ja");
        assert_eq!(cli.backend, "deepseek");
        assert_eq!(cli.proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
    }

    #[test]
    fn test_flags_become_config() {
        let cli = Cli::parse_from([
            "article_translator",
            "--no-cache",
            "--rewrite",
            "--debug-dump",
            "--concurrency",
            "2",
            "--chunk-size",
            "500",
            "--openai-api-key",
            "sk-1",
        ]);
        let config = cli.into_config().unwrap();

        assert!(!config.use_cache);
        assert!(config.rewrite_mode);
        assert!(config.debug_dump);
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-1"));
        assert_eq!(config.min_content_chars, 100);
    }

    #[test]
    fn test_config_file_is_authoritative() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "backend: deepl\ntarget_lang: en\nmax_concurrency: 3\ndeepl_api_key: FROM_FILE\n",
        )
        .unwrap();
        let cli = Cli::parse_from([
            "article_translator",
            "-c",
            path.to_str().unwrap(),
            "-b",
            "openai",
            "--deepl-api-key",
            "FROM_FLAG",
        ]);
        let config = cli.into_config().unwrap();

        assert_eq!(config.backend, "deepl");
        assert_eq!(config.target_lang, "en");
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.deepl_api_key.as_deref(), Some("FROM_FILE"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cli = Cli::parse_from(["article_translator", "--concurrency", "0"]);
        assert!(matches!(
            cli.into_config(),
            Err(ConfigError::Value { field: "max_concurrency", .. })
        ));
    }
}
