//! Bridge to the long-lived Python worker that wraps `qwen_tts`.
//!
//! The worker is spawned on first use and talks over its stdin/stdout pipes.
//! Calls are serialized; a transport fault kills the process so the next call
//! starts a fresh one. Every process gets a new generation number, which lets
//! callers notice that state they placed in an earlier process is gone.

use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};

use super::protocol::{read_frame, write_frame, WorkerCommand, WorkerReply};

struct WorkerProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    generation: u64,
}

impl WorkerProcess {
    fn request(&mut self, command: &WorkerCommand) -> Result<WorkerReply> {
        write_frame(&mut self.stdin, command)?;
        read_frame(&mut self.stdout)
    }

    fn terminate(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub struct WorkerBridge {
    python_cmd: String,
    script_path: PathBuf,
    process: Mutex<Option<WorkerProcess>>,
    spawned: AtomicU64,
}

impl WorkerBridge {
    pub fn new(python_cmd: impl Into<String>, script_path: impl Into<PathBuf>) -> Self {
        Self {
            python_cmd: python_cmd.into(),
            script_path: script_path.into(),
            process: Mutex::new(None),
            spawned: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.python_cmd.clone(), config.worker_script.clone())
    }

    fn spawn(&self) -> Result<WorkerProcess> {
        if !self.script_path.exists() {
            return Err(Error::Worker(format!(
                "worker script not found at {}",
                self.script_path.display()
            )));
        }

        info!(
            "Starting inference worker: {} {}",
            self.python_cmd,
            self.script_path.display()
        );

        let mut child = Command::new(&self.python_cmd)
            .arg(&self.script_path)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::Worker(format!("Failed to start worker: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Worker("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Worker("worker stdout unavailable".to_string()))?;

        let mut process = WorkerProcess {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            generation: 0,
        };

        match process
            .request(&WorkerCommand::Check)
            .and_then(WorkerReply::into_result)
        {
            Ok(reply) => {
                process.generation = self.spawned.fetch_add(1, Ordering::SeqCst) + 1;
                info!(
                    "Inference worker {} ready (torch device hint: {})",
                    process.generation,
                    reply.device.as_deref().unwrap_or("unknown")
                );
                Ok(process)
            }
            Err(err) => {
                process.terminate();
                Err(Error::Worker(format!("worker failed its startup check: {err}")))
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<WorkerProcess>>> {
        self.process
            .lock()
            .map_err(|_| Error::Worker("worker lock poisoned".to_string()))
    }

    /// Start the worker if needed and return its generation.
    fn ensure_running(&self, slot: &mut Option<WorkerProcess>) -> Result<u64> {
        if slot.is_none() {
            *slot = Some(self.spawn()?);
        }
        slot.as_ref()
            .map(|process| process.generation)
            .ok_or_else(|| Error::Worker("worker not running".to_string()))
    }

    fn exchange(slot: &mut Option<WorkerProcess>, command: &WorkerCommand) -> Result<WorkerReply> {
        let outcome = match slot.as_mut() {
            Some(process) => process.request(command),
            None => return Err(Error::Worker("worker not running".to_string())),
        };

        match outcome {
            Ok(reply) => reply.into_result(),
            Err(err) => {
                warn!("Worker transport failed, restarting on next call: {}", err);
                if let Some(process) = slot.take() {
                    process.terminate();
                }
                Err(Error::Worker(err.to_string()))
            }
        }
    }

    /// Send one command and wait for its reply. Error replies become `Err`.
    pub fn call(&self, command: &WorkerCommand) -> Result<WorkerReply> {
        self.call_with_generation(command).map(|(reply, _)| reply)
    }

    /// Like `call`, also returning the generation of the process that answered.
    pub fn call_with_generation(&self, command: &WorkerCommand) -> Result<(WorkerReply, u64)> {
        let mut guard = self.lock()?;
        let generation = self.ensure_running(&mut guard)?;
        let reply = Self::exchange(&mut guard, command)?;
        Ok((reply, generation))
    }

    /// Send `command` to a process that has run `setup`.
    ///
    /// `prepared_in` holds the generation that last ran `setup`. When the worker
    /// has been replaced since, `setup` is replayed first under the same lock.
    pub fn call_prepared(
        &self,
        prepared_in: &AtomicU64,
        setup: &WorkerCommand,
        command: &WorkerCommand,
    ) -> Result<WorkerReply> {
        let mut guard = self.lock()?;
        let generation = self.ensure_running(&mut guard)?;

        if prepared_in.load(Ordering::SeqCst) != generation {
            info!("Worker {} is new, replaying its setup", generation);
            Self::exchange(&mut guard, setup)?;
            prepared_in.store(generation, Ordering::SeqCst);
        }

        Self::exchange(&mut guard, command)
    }

    /// Generation of the running process, if any.
    pub fn generation(&self) -> Option<u64> {
        self.process
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|process| process.generation))
    }

    pub fn is_running(&self) -> bool {
        self.process
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Ask the worker to exit, killing it if it does not answer.
    pub fn shutdown(&self) {
        let Ok(mut guard) = self.process.lock() else {
            return;
        };
        if let Some(mut process) = guard.take() {
            info!("Stopping inference worker");
            if let Err(err) = process.request(&WorkerCommand::Shutdown) {
                debug!("Worker did not acknowledge shutdown: {}", err);
            }
            process.terminate();
        }
    }
}

impl Drop for WorkerBridge {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.process.lock() {
            if let Some(process) = guard.take() {
                process.terminate();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Runs the real worker loop with a check handler that writes to stdout
    /// both through Python and straight to fd 1.
    const NOISY_WORKER: &str = r#"
import os, sys
sys.path.insert(0, __SCRIPTS__)
import qwen_tts_worker as worker

def noisy_check(request):
    print("library chatter on stdout")
    os.write(1, b"raw bytes on fd 1\n")
    return {"status": "ok", "device": "cpu", "loaded": []}

worker.HANDLERS["check"] = noisy_check
worker.main()
"#;

    /// Stubs torch so the CPU tuning path can run without it, and reports
    /// what it recorded through the check reply.
    const TUNING_WORKER: &str = r#"
import os, sys, types
sys.path.insert(0, __SCRIPTS__)
import qwen_tts_worker as worker

calls = {"threads": [], "interop": []}
torch = types.ModuleType("torch")
torch.set_num_threads = lambda n: calls["threads"].append(n)
torch.set_num_interop_threads = lambda n: calls["interop"].append(n)
torch.backends = types.SimpleNamespace(mkl=types.SimpleNamespace(enabled=False))
sys.modules["torch"] = torch

def tuning_check(request):
    worker.tune_cpu()
    worker.tune_cpu()
    return {
        "status": "ok",
        "device": "cpu",
        "loaded": [
            str(calls["threads"]),
            str(calls["interop"]),
            str(torch.backends.mkl.enabled),
            str(os.cpu_count() or 1),
        ],
    }

worker.HANDLERS["check"] = tuning_check
worker.main()
"#;

    fn python_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn scripts_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scripts")
    }

    #[test]
    fn test_missing_script_is_a_worker_error() {
        let script = std::env::temp_dir()
            .join(format!("voxserve-missing-{}", uuid::Uuid::new_v4()))
            .join("worker.py");
        let bridge = WorkerBridge::new("python3", script);

        assert!(matches!(
            bridge.call(&WorkerCommand::Check),
            Err(Error::Worker(_))
        ));
        assert!(!bridge.is_running());
        bridge.shutdown();
    }

    #[test]
    fn test_worker_output_on_stdout_does_not_break_frames() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }

        let dir = std::env::temp_dir().join(format!("voxserve-noisy-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let scripts = scripts_dir().to_string_lossy().to_string();
        let script = dir.join("noisy_worker.py");
        std::fs::write(
            &script,
            NOISY_WORKER.replace("__SCRIPTS__", &format!("{:?}", scripts)),
        )
        .unwrap();

        let bridge = WorkerBridge::new("python3", &script);
        for _ in 0..3 {
            let reply = bridge.call(&WorkerCommand::Check).unwrap();
            assert_eq!(reply.device.as_deref(), Some("cpu"));
        }
        assert_eq!(bridge.generation(), Some(1));

        bridge.shutdown();
        assert!(!bridge.is_running());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_cpu_thread_tuning_runs_once() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }

        let dir = std::env::temp_dir().join(format!("voxserve-tuning-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let scripts = scripts_dir().to_string_lossy().to_string();
        let script = dir.join("tuning_worker.py");
        std::fs::write(
            &script,
            TUNING_WORKER.replace("__SCRIPTS__", &format!("{:?}", scripts)),
        )
        .unwrap();

        let bridge = WorkerBridge::new("python3", &script);
        let reply = bridge.call(&WorkerCommand::Check).unwrap();
        let report = reply.loaded.unwrap();
        let cores: usize = report[3].parse().unwrap();

        assert_eq!(report[0], format!("[{cores}]"));
        assert_eq!(report[1], format!("[{}]", (cores / 2).max(1)));
        assert_eq!(report[2], "True");

        bridge.shutdown();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
