use approx::assert_relative_eq;
use kinet_core::{
    apply_steady_state, build_network, integrate, solve_linear, ParameterSet, RateLaw, Reaction,
    ReactionNetwork, Species, SteadyStateGroup, TimeGrid,
};

fn species(names: &[&str]) -> Vec<Species> {
    names.iter().map(|&n| Species::from(n)).collect()
}

fn consecutive() -> ReactionNetwork {
    build_network(
        species(&["A", "B", "C"]),
        vec![
            Reaction::mass_action(&[("A", 1.0)], &[("B", 1.0)], "k1"),
            Reaction::mass_action(&[("B", 1.0)], &[("C", 1.0)], "k2"),
        ],
    )
    .expect("valid network")
}

fn enzyme() -> ReactionNetwork {
    build_network(
        species(&["E", "S", "ES", "P"]),
        vec![
            Reaction::mass_action(&[("E", 1.0), ("S", 1.0)], &[("ES", 1.0)], "k1"),
            Reaction::mass_action(&[("ES", 1.0)], &[("E", 1.0), ("S", 1.0)], "km1"),
            Reaction::mass_action(&[("ES", 1.0)], &[("E", 1.0), ("P", 1.0)], "k2"),
        ],
    )
    .expect("valid network")
}

#[test]
fn conserved_quantities_stay_constant_along_trajectories() {
    let network = enzyme();
    let params = ParameterSet::new().with("k1", 5.0).with("km1", 1.0).with("k2", 2.0);
    let c0 = network.state_from(&[("E", 0.2), ("S", 1.0)]).expect("known species");
    let times = TimeGrid::linspace(0.0, 10.0, 21).expect("valid grid");
    let trajectory = integrate(&network, &c0, &params, &times).expect("integrates");

    let laws = network.conservation_laws();
    assert_eq!(laws.len(), 2);
    for w in laws {
        let initial: f64 = w.iter().zip(&c0).map(|(a, b)| a * b).sum();
        for (_, state) in trajectory.iter() {
            let current: f64 = w.iter().zip(state).map(|(a, b)| a * b).sum();
            assert_relative_eq!(current, initial, epsilon = 1e-9);
        }
    }
}

#[test]
fn closed_form_and_numeric_solutions_agree() {
    let network = consecutive();
    let params = ParameterSet::new().with("k1", 2.0).with("k2", 0.5);
    let c0 = [1.0, 0.2, 0.0];
    let times = TimeGrid::linspace(0.0, 8.0, 33).expect("valid grid");

    let numeric = integrate(&network, &c0, &params, &times).expect("integrates");
    let exact = solve_linear(&network, &params)
        .expect("diagonalizable")
        .trajectory(&c0, &times)
        .expect("samples");

    for (n, e) in numeric.states.iter().zip(&exact.states) {
        for (a, b) in n.iter().zip(e) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9, max_relative = 1e-6);
        }
    }
}

#[test]
fn single_irreversible_step_from_both_solvers() {
    let network = build_network(
        species(&["A", "B"]),
        vec![Reaction::mass_action(&[("A", 1.0)], &[("B", 1.0)], "k")],
    )
    .expect("valid network");
    let k = 1.3;
    let params = ParameterSet::new().with("k", k);
    let times = [0.0, 0.1, 1.0, 3.0];

    let numeric = integrate(&network, &[1.0, 0.0], &params, &times).expect("integrates");
    let closed = solve_linear(&network, &params).expect("diagonalizable");
    for (t, state) in numeric.iter() {
        let a = (-k * t).exp();
        let exact = closed.evaluate(&[1.0, 0.0], t).expect("evaluates");
        assert_relative_eq!(state[0], a, epsilon = 1e-9, max_relative = 1e-6);
        assert_relative_eq!(state[1], 1.0 - a, epsilon = 1e-9, max_relative = 1e-6);
        assert_relative_eq!(exact[0], a, epsilon = 1e-12);
        assert_relative_eq!(exact[1], 1.0 - a, epsilon = 1e-12);
    }
}

#[test]
fn integration_is_idempotent() {
    let network = enzyme();
    let params = ParameterSet::new().with("k1", 5.0).with("km1", 1.0).with("k2", 2.0);
    let c0 = [0.2, 1.0, 0.0, 0.0];
    let times = TimeGrid::linspace(0.0, 4.0, 9).expect("valid grid");
    let first = integrate(&network, &c0, &params, &times).expect("integrates");
    let second = integrate(&network, &c0, &params, &times).expect("integrates");
    assert_eq!(first, second);
}

#[test]
fn steady_state_reduction_tracks_the_full_network() {
    let network = build_network(
        species(&["A", "Astar", "P"]),
        vec![
            Reaction::mass_action(&[("A", 2.0)], &[("Astar", 1.0), ("A", 1.0)], "k1"),
            Reaction::mass_action(&[("Astar", 1.0), ("A", 1.0)], &[("A", 2.0)], "k2"),
            Reaction::mass_action(&[("Astar", 1.0)], &[("P", 1.0)], "k3"),
        ],
    )
    .expect("valid network");
    let params = ParameterSet::new().with("k1", 1.0).with("k2", 200.0).with("k3", 200.0);
    let times = TimeGrid::linspace(0.0, 2.0, 5).expect("valid grid");

    let full = integrate(&network, &[1.0, 0.0, 0.0], &params, &times).expect("integrates");
    let reduced = apply_steady_state(&network, &SteadyStateGroup::new(&["Astar"]), &params)
        .expect("reduces");
    let slow = integrate(&reduced, &[1.0, 0.0], &ParameterSet::new(), &times).expect("integrates");

    assert_eq!(slow.species, vec!["A", "P"]);
    let p_full = full.series("P").expect("has P");
    let p_slow = slow.series("P").expect("has P");
    assert_relative_eq!(p_full[4], p_slow[4], max_relative = 1e-2);

    // The reduced trajectory stays on the steady-state manifold.
    for (t, state) in slow.iter() {
        let full_state = reduced.full_state(t, state).expect("solvable");
        let residuals = reduced.constraint_residuals(t, &full_state).expect("evaluates");
        assert!(residuals.iter().all(|r| r.abs() < 1e-9), "{:?}", residuals);
    }
}

#[test]
fn integration_parameters_overlay_reduction_parameters() {
    let network = enzyme();
    let group = SteadyStateGroup::with_constraints(
        &["ES", "E"],
        vec![
            kinet_core::Constraint::zero_net_rate("ES"),
            kinet_core::Constraint::conservation(&[("E", 1.0), ("ES", 1.0)], "E0"),
        ],
    );
    let bound = ParameterSet::new()
        .with("k1", 10.0)
        .with("km1", 1.0)
        .with("k2", 1.0)
        .with("E0", 0.1);
    let reduced = apply_steady_state(&network, &group, &bound).expect("reduces");

    let times = [0.0, 1.0];
    let base = integrate(&reduced, &[1.0, 0.0], &ParameterSet::new(), &times).expect("integrates");
    let doubled = integrate(&reduced, &[1.0, 0.0], &ParameterSet::new().with("E0", 0.2), &times)
        .expect("integrates");
    let p_base = base.final_state().expect("non-empty")[1];
    let p_doubled = doubled.final_state().expect("non-empty")[1];
    assert!(p_doubled > 1.5 * p_base);
}

#[test]
fn power_law_orders_match_integrated_rate_laws() {
    let k = 0.5;
    let a0 = 1.0;
    let exact: [fn(f64) -> f64; 4] = [
        |t| 1.0 - 0.5 * t,
        |t| (-0.5 * t).exp(),
        |t| 1.0 / (1.0 + 0.5 * t),
        |t| (1.0 + 2.0 * 0.5 * t).powf(-0.5),
    ];
    let times = TimeGrid::linspace(0.0, 1.5, 7).expect("valid grid");
    for (order, solution) in exact.iter().enumerate() {
        let orders: Vec<(&str, f64)> = if order == 0 {
            Vec::new()
        } else {
            vec![("A", order as f64)]
        };
        let network = build_network(
            species(&["A", "P"]),
            vec![Reaction::new(
                &[("A", 1.0)],
                &[("P", 1.0)],
                RateLaw::power_law("k", &orders),
            )],
        )
        .expect("valid network");
        let params = ParameterSet::new().with("k", k);
        let trajectory = integrate(&network, &[a0, 0.0], &params, &times).expect("integrates");
        for (t, state) in trajectory.iter() {
            assert_relative_eq!(state[0], solution(t), max_relative = 1e-6);
            assert_relative_eq!(state[0] + state[1], a0, epsilon = 1e-10);
        }
    }
}

#[test]
fn reversible_association_reaches_its_equilibrium_extent() {
    // A + B <=> C; kf (A0 - x)(B0 - x) = kr x at equilibrium.
    let network = build_network(
        species(&["A", "B", "C"]),
        vec![
            Reaction::mass_action(&[("A", 1.0), ("B", 1.0)], &[("C", 1.0)], "kf"),
            Reaction::mass_action(&[("C", 1.0)], &[("A", 1.0), ("B", 1.0)], "kr"),
        ],
    )
    .expect("valid network");
    let (kf, kr, a0, b0) = (2.0, 1.0, 1.0, 0.5);
    let params = ParameterSet::new().with("kf", kf).with("kr", kr);
    let trajectory = integrate(&network, &[a0, b0, 0.0], &params, &[0.0, 20.0]).expect("integrates");

    let b = kf * (a0 + b0) + kr;
    let extent = (b - (b * b - 4.0 * kf * kf * a0 * b0).sqrt()) / (2.0 * kf);
    let last = trajectory.final_state().expect("non-empty");
    assert_relative_eq!(last[2], extent, max_relative = 1e-6);
    assert_relative_eq!(last[0], a0 - extent, max_relative = 1e-6);
}

#[test]
fn networks_load_from_json_and_share_across_threads() {
    let species: Vec<Species> = serde_json::from_str(r#"[{"name": "A"}, {"name": "B"}]"#).expect("species");
    let reactions: Vec<Reaction> = serde_json::from_str(
        r#"[{"consumption": [["A", 1.0]], "production": [["B", 1.0]],
             "rate_law": {"kind": "expression", "formula": "k*A"}}]"#,
    )
    .expect("reactions");
    let network = build_network(species, reactions).expect("valid network");
    assert!(network.species()[0].non_negative);

    std::thread::scope(|scope| {
        let handles: Vec<_> = [0.5, 1.0]
            .into_iter()
            .map(|k| {
                let network = &network;
                scope.spawn(move || {
                    let params = ParameterSet::new().with("k", k);
                    integrate(network, &[1.0, 0.0], &params, &[0.0, 1.0]).expect("integrates")
                })
            })
            .collect();
        for (handle, k) in handles.into_iter().zip([0.5, 1.0]) {
            let trajectory = handle.join().expect("thread finished");
            let a = trajectory.final_state().expect("non-empty")[0];
            assert_relative_eq!(a, (-k as f64).exp(), max_relative = 1e-6);
        }
    });
}
