use platoon_sim::{Scenario, Simulation, SimulationConfig};

fn main() {
    let config = SimulationConfig::new(4, Scenario::Emergency);
    let mut sim = match Simulation::new(config) {
        Ok(sim) => sim,
        Err(err) => {
            eprintln!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };

    println!("Simulating...");
    let history = sim.run();

    for event in history.events() {
        println!(
            "{:?} on {} at {:.1}s",
            event.kind, event.source, event.time_fired
        );
    }
    if let Some(last) = history.last() {
        for decision in &last.decisions {
            let Some(vehicle) = last.state.get(decision.vehicle) else {
                continue;
            };
            println!(
                "{}: lane {}, {:.1}m at {:.1}m/s, {}",
                vehicle.id(),
                vehicle.lane(),
                vehicle.pos_mid(),
                vehicle.vel(),
                decision.rationale
            );
        }
    }

    let stats = history.stats();
    println!(
        "{} ticks: {} collisions, {} emergency ticks, {} degraded decisions, {} following violations ({} during maneuvers)",
        stats.ticks,
        stats.collisions,
        stats.emergency_ticks,
        stats.degraded_decisions,
        stats.following_violations,
        stats.transient_violations
    );
    println!("Minimum following margin: {:.2}m", stats.min_following_margin);
    println!("Safety: {:.0}%", stats.safety_percentage);
    if !history.formal_guarantees() {
        println!("Time step differs from 0.1s, reaction time guarantees do not apply");
    }
}
