use gym_vector::{RenderFrame, VecEnvConfig, VectorEnv};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = VecEnvConfig::new("CartPole-v1", 8).with_seed(2024).with_render_mode("random_2");
    let mut envs = VectorEnv::make(&config)?;
    envs.reset()?;

    let mut finished = 0usize;
    let mut total_reward = 0.0f32;
    for step in 0..300 {
        let actions = envs.sample_actions()?;
        let batch = envs.step(&actions)?;
        total_reward += batch.rewards.sum();
        for info in batch.done_indices.iter().map(|&slot| &batch.infos[slot]) {
            if let Some(ret) = info.get("episode_return").and_then(|v| v.as_f64()) {
                info!(step, episode_return = ret, "episode finished");
            }
        }
        finished += batch.done_indices.len();
        envs.partial_reset()?;

        if step % 50 == 0 {
            for (slot, frame) in envs.render()? {
                if let RenderFrame::Text(text) = frame {
                    println!("[{step:>3}] slot {slot}: {text}");
                }
            }
        }
    }

    info!(finished, total_reward, "rollout complete");
    envs.close();
    Ok(())
}
