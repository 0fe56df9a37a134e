use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::{debug, info};

use crate::audio::{base64_decode, base64_encode, decode_wav_bytes, AudioEncoder, AudioFormat};
use crate::catalog::ModelVariant;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::registry::{
    GeneratedAudio, GenerationMode, GenerationParams, LoadSpec, ModelHandle, ModelLoader,
    RegistryEntry, SpeechModel,
};

use super::bridge::WorkerBridge;
use super::hub::HubFetcher;
use super::protocol::{GenerateCommand, WorkerCommand};

/// Native rate of the 12Hz codec decoder, used when the worker does not say.
const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Loads checkpoints by fetching them from the Hub and handing the local
/// snapshot to the worker.
pub struct WorkerLoader {
    fetcher: HubFetcher,
    bridge: Arc<WorkerBridge>,
}

impl WorkerLoader {
    pub fn new(fetcher: HubFetcher, bridge: Arc<WorkerBridge>) -> Self {
        Self { fetcher, bridge }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            HubFetcher::new(config.models_dir.clone()),
            Arc::new(WorkerBridge::from_config(config)),
        )
    }

    pub fn bridge(&self) -> Arc<WorkerBridge> {
        self.bridge.clone()
    }
}

impl ModelLoader for WorkerLoader {
    fn load(&self, spec: &LoadSpec) -> Result<ModelHandle> {
        let snapshot = self
            .fetcher
            .fetch(&spec.resource_id)
            .map_err(|e| Error::model_load(spec.variant, e))?;
        debug!("{} snapshot at {:?}", spec.resource_id, snapshot);

        let model = WorkerModel::load_into(self.bridge.clone(), spec, &snapshot)?;
        Ok(Arc::new(model))
    }

    fn unload(&self, entry: &RegistryEntry) -> Result<()> {
        self.bridge
            .call(&WorkerCommand::Unload {
                key: entry.variant.key().to_string(),
            })
            .map(|_| ())
    }
}

/// A checkpoint resident in the worker process.
///
/// Keeps the command that loaded it so a restarted worker can be given the
/// checkpoint again before the next generation.
pub struct WorkerModel {
    variant: ModelVariant,
    sample_rate: u32,
    bridge: Arc<WorkerBridge>,
    load_command: WorkerCommand,
    /// Worker generation that holds the checkpoint
    loaded_in: AtomicU64,
}

impl WorkerModel {
    /// Have the worker load the checkpoint at `model_path`.
    pub fn load_into(bridge: Arc<WorkerBridge>, spec: &LoadSpec, model_path: &Path) -> Result<Self> {
        let kind = if spec.variant.is_tokenizer() {
            "tokenizer"
        } else {
            "model"
        };
        let load_command = WorkerCommand::Load {
            key: spec.variant.key().to_string(),
            model_path: model_path.to_string_lossy().to_string(),
            kind: kind.to_string(),
            device: spec.device_id.clone(),
            dtype: spec.dtype.as_str().to_string(),
        };

        let (reply, generation) = bridge
            .call_with_generation(&load_command)
            .map_err(|e| Error::model_load(spec.variant, e))?;

        info!(
            "Worker placed {} on {}",
            spec.variant,
            reply.device.as_deref().unwrap_or(&spec.device_id)
        );

        Ok(Self {
            variant: spec.variant,
            sample_rate: reply.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
            bridge,
            load_command,
            loaded_in: AtomicU64::new(generation),
        })
    }

    fn generate_command(&self, params: &GenerationParams) -> Result<GenerateCommand> {
        let mut command = GenerateCommand {
            key: self.variant.key().to_string(),
            mode: self.variant.key().to_string(),
            text: params.text.clone(),
            language: params.language.clone(),
            speaker: None,
            instruct: None,
            speed: None,
            ref_audio_base64: None,
            ref_text: None,
            x_vector_only_mode: None,
        };

        match (&params.mode, self.variant) {
            (GenerationMode::CustomVoice { speaker, instruct }, ModelVariant::CustomVoice) => {
                command.speaker = Some(speaker.clone());
                command.instruct = instruct.clone();
                command.speed = params.speed;
            }
            (GenerationMode::VoiceDesign { instruct }, ModelVariant::VoiceDesign) => {
                command.instruct = Some(instruct.clone());
            }
            (
                GenerationMode::VoiceClone {
                    reference_samples,
                    reference_sample_rate,
                    reference_text,
                    x_vector_only,
                },
                ModelVariant::VoiceClone,
            ) => {
                let wav = AudioEncoder::new(*reference_sample_rate, 1)
                    .encode(reference_samples, AudioFormat::Wav)?;
                command.ref_audio_base64 = Some(base64_encode(&wav));
                command.ref_text = Some(reference_text.clone());
                command.x_vector_only_mode = Some(*x_vector_only);
            }
            (mode, variant) => {
                return Err(Error::synthesis(
                    variant,
                    format!("model cannot serve {} requests", mode.label()),
                ))
            }
        }

        Ok(command)
    }
}

impl SpeechModel for WorkerModel {
    fn variant(&self) -> ModelVariant {
        self.variant
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn supports_native_speed(&self) -> bool {
        self.variant == ModelVariant::CustomVoice
    }

    fn generate(&self, params: &GenerationParams) -> Result<GeneratedAudio> {
        let command = self.generate_command(params)?;
        let reply = self
            .bridge
            .call_prepared(
                &self.loaded_in,
                &self.load_command,
                &WorkerCommand::Generate(command),
            )
            .map_err(|e| Error::synthesis(self.variant, e))?;

        let audio = reply
            .audio_base64
            .ok_or_else(|| Error::synthesis(self.variant, "worker returned no audio"))?;
        let wav = base64_decode(&audio).map_err(|e| Error::synthesis(self.variant, e))?;
        let (samples, sample_rate) =
            decode_wav_bytes(&wav).map_err(|e| Error::synthesis(self.variant, e))?;

        debug!("Worker generated {} samples at {} Hz", samples.len(), sample_rate);

        Ok(GeneratedAudio {
            samples,
            sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::catalog::ModelSize;
    use crate::device::ComputeDtype;

    fn model(variant: ModelVariant) -> WorkerModel {
        WorkerModel {
            variant,
            sample_rate: DEFAULT_SAMPLE_RATE,
            bridge: Arc::new(WorkerBridge::new("python3", "does-not-exist.py")),
            load_command: WorkerCommand::Check,
            loaded_in: AtomicU64::new(0),
        }
    }

    /// Speaks the frame protocol. The first generate kills the process; later
    /// ones answer with a tone, but only for keys loaded into that process.
    const CRASHING_WORKER: &str = r#"
import base64, io, json, os, struct, sys, wave

MARKER = __MARKER__
loaded = set()

def read_frame():
    head = sys.stdin.buffer.read(4)
    if len(head) < 4:
        return None
    (length,) = struct.unpack(">I", head)
    return json.loads(sys.stdin.buffer.read(length))

def write_frame(obj):
    body = json.dumps(obj).encode()
    sys.stdout.buffer.write(struct.pack(">I", len(body)) + body)
    sys.stdout.buffer.flush()

def tone():
    buf = io.BytesIO()
    with wave.open(buf, "wb") as out:
        out.setnchannels(1)
        out.setsampwidth(2)
        out.setframerate(22050)
        out.writeframes(b"\x00\x10" * 2205)
    return base64.b64encode(buf.getvalue()).decode()

while True:
    msg = read_frame()
    if msg is None:
        break
    command = msg["command"]
    if command == "load":
        loaded.add(msg["key"])
        write_frame({"status": "ok", "sample_rate": 22050, "device": "cpu"})
    elif command == "generate":
        if msg["key"] not in loaded:
            write_frame({"status": "error", "error": "model %s is not loaded" % msg["key"]})
        elif not os.path.exists(MARKER):
            open(MARKER, "w").close()
            os._exit(1)
        else:
            write_frame({"status": "ok", "audio_base64": tone()})
    elif command == "shutdown":
        write_frame({"status": "ok"})
        break
    else:
        write_frame({"status": "ok", "device": "cpu"})
"#;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn params(mode: GenerationMode) -> GenerationParams {
        GenerationParams {
            text: "Hello there".to_string(),
            language: "English".to_string(),
            mode,
            speed: Some(1.5),
        }
    }

    #[test]
    fn test_custom_voice_command_carries_speaker_and_speed() {
        let command = model(ModelVariant::CustomVoice)
            .generate_command(&params(GenerationMode::CustomVoice {
                speaker: "Ryan".into(),
                instruct: Some("Whisper".into()),
            }))
            .unwrap();
        assert_eq!(command.mode, "custom_voice");
        assert_eq!(command.speaker.as_deref(), Some("Ryan"));
        assert_eq!(command.instruct.as_deref(), Some("Whisper"));
        assert_eq!(command.speed, Some(1.5));
    }

    #[test]
    fn test_voice_clone_command_embeds_reference_wav() {
        let command = model(ModelVariant::VoiceClone)
            .generate_command(&params(GenerationMode::VoiceClone {
                reference_samples: vec![0.25; 16_000],
                reference_sample_rate: 16_000,
                reference_text: "Reference words".into(),
                x_vector_only: true,
            }))
            .unwrap();

        let wav = base64_decode(command.ref_audio_base64.as_deref().unwrap()).unwrap();
        let (samples, rate) = decode_wav_bytes(&wav).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(samples.len(), 16_000);
        assert_eq!(command.x_vector_only_mode, Some(true));
        assert!(command.speed.is_none());
    }

    #[test]
    fn test_mismatched_mode_is_rejected() {
        let err = model(ModelVariant::VoiceDesign)
            .generate_command(&params(GenerationMode::CustomVoice {
                speaker: "Ryan".into(),
                instruct: None,
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Synthesis { .. }));
    }

    #[test]
    fn test_generate_reloads_after_worker_restart() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }

        let dir = std::env::temp_dir().join(format!("voxserve-worker-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let marker = dir.join("crashed").to_string_lossy().to_string();
        let script = dir.join("worker.py");
        std::fs::write(
            &script,
            CRASHING_WORKER.replace("__MARKER__", &format!("{:?}", marker)),
        )
        .unwrap();

        let bridge = Arc::new(WorkerBridge::new("python3", &script));
        let spec = LoadSpec {
            variant: ModelVariant::CustomVoice,
            size: ModelSize::Small,
            resource_id: "Qwen/Qwen3-TTS-12Hz-0.6B-CustomVoice".to_string(),
            device_id: "cpu".to_string(),
            dtype: ComputeDtype::Float32,
        };
        let model = WorkerModel::load_into(bridge.clone(), &spec, &dir).unwrap();
        assert_eq!(model.sample_rate(), 22_050);
        assert_eq!(bridge.generation(), Some(1));

        let request = params(GenerationMode::CustomVoice {
            speaker: "Ryan".into(),
            instruct: None,
        });
        assert!(model.generate(&request).is_err());
        assert!(!bridge.is_running());

        let audio = model.generate(&request).unwrap();
        assert_eq!(audio.sample_rate, 22_050);
        assert_eq!(audio.samples.len(), 2205);
        assert_eq!(bridge.generation(), Some(2));

        model.generate(&request).unwrap();
        assert_eq!(bridge.generation(), Some(2));

        bridge.shutdown();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_only_custom_voice_has_native_speed() {
        assert!(model(ModelVariant::CustomVoice).supports_native_speed());
        assert!(!model(ModelVariant::VoiceClone).supports_native_speed());
    }
}
