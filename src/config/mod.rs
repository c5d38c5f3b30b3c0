pub mod credentials;
pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    A2aConfig, AgentDefaults, AgentsConfig, AnthropicOAuthConfig, BrowserConfig, ChannelsConfig,
    CheckpointConfig, CircuitBreakerConfig, CognitiveConfig, CompactionConfig, Config,
    ContextProviderConfig, CostGuardConfig, CredentialHelperConfig, DiscordCommand,
    DiscordCommandOption, DiscordConfig, DmPolicy, ExecToolConfig, ExfiltrationGuardConfig,
    FusionStrategy, GatewayConfig, GitHubConfig, GoogleConfig, ImageGenConfig, McpConfig,
    McpServerConfig, MediaConfig, MemoryConfig, ModelCost, ObsidianConfig, OutboundConfig,
    PromptGuardAction,
    PromptGuardConfig, ProviderConfig, ProvidersConfig, SandboxConfig, SlackConfig,
    TelegramConfig, TodoistConfig, ToolsConfig, TranscriptionConfig, TwilioConfig, VoiceConfig,
    WeatherConfig, WebSearchConfig, WebhookConfig, WebhookTarget, WhatsAppConfig,
    normalize_provider,
};
