//! Push-to-talk voice conversation driven by recorded input files.
//!
//! Each input file stands in for one spoken turn. The session runs hands-free:
//! after a reply is played it starts listening to the next file on its own.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use persona_voice_core::error::VoiceError;
use persona_voice_media::device::{FileMicrophone, FileSink};
use persona_voice_media::{AudioCapture, Trigger, VoiceSessionController, VoiceState};

use crate::app::App;

pub struct VoiceArgs {
    pub persona: String,
    pub inputs: Vec<PathBuf>,
    pub conversation: Option<String>,
    pub out_dir: PathBuf,
    pub player: Option<String>,
}

pub async fn run(app: &App, args: VoiceArgs) -> anyhow::Result<()> {
    let persona = app.persona(&args.persona).await?;
    let conversation_id = app
        .conversation(&persona, args.conversation.as_deref())
        .await?;

    let mut sink = FileSink::new(&args.out_dir);
    if let Some(player) = &args.player {
        sink = sink.with_player(player);
    }
    let pipeline = app.pipeline(Arc::new(sink))?;

    let mic = Arc::new(FileMicrophone::new(args.inputs.iter().cloned()));
    let capture = AudioCapture::from_config(mic.clone(), &app.config);
    let session = VoiceSessionController::new(pipeline, capture, conversation_id.clone(), persona)
        .with_notice_ttl(Duration::from_secs(app.config.notice_secs()));

    println!(
        "Talking to {} with {} recording(s). Ctrl-C to stop.",
        session.persona().name,
        args.inputs.len()
    );

    let mut pending = args.inputs.len();
    let mut turns = 0usize;
    if !listen(&session).await {
        return Ok(());
    }

    while pending > 0 {
        tokio::select! {
            _ = mic.wait_drained() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
        pending -= 1;

        let processed = tokio::select! {
            processed = session.stop_and_process() => processed,
            _ = tokio::signal::ctrl_c() => {
                info!(state = ?session.state(), "Interrupted mid-turn");
                break;
            }
        };

        match processed {
            Ok(Trigger::Completed(turn)) => {
                turns += 1;
                println!("You: {}", turn.transcript);
                println!("{}: {}", session.persona().name, turn.reply);
                if turn.audio.is_none() {
                    println!("   (text only)");
                }
            }
            Ok(_) => {}
            Err(VoiceError::StaleResponse) => break,
            Err(e) => eprintln!("{}", e.user_message()),
        }

        if pending > 0 && session.state() == VoiceState::Idle && !listen(&session).await {
            break;
        }
    }

    session.close();
    println!("Conversation {conversation_id}: {turns} turn(s)");
    Ok(())
}

/// Press the mic button; reports and returns `false` when the microphone fails.
async fn listen(session: &VoiceSessionController) -> bool {
    match session.start_listening().await {
        Ok(_) => true,
        Err(e) => {
            eprintln!("{}", e.user_message());
            false
        }
    }
}
