//! Turn loop state
//!
//! Tracks round progress of one orchestration turn.

/// State of the tool-calling loop
#[derive(Debug, Clone)]
pub struct TurnState {
    /// Rounds started so far
    pub round: usize,
    /// Round budget
    pub max_rounds: usize,
    /// Whether any tool has been invoked this turn
    pub used_tools: bool,
}

impl TurnState {
    /// Create a new loop state; the budget is at least one round
    pub fn new(max_rounds: usize) -> Self {
        Self {
            round: 0,
            max_rounds: max_rounds.max(1),
            used_tools: false,
        }
    }

    /// Check if another round may start
    pub fn should_continue(&self) -> bool {
        self.round < self.max_rounds
    }

    /// Start the next round, returning its 1-based number
    pub fn next_round(&mut self) -> usize {
        self.round += 1;
        self.round
    }

    pub fn mark_tools_used(&mut self) {
        self.used_tools = true;
    }

    /// Human label for the current round
    pub fn label(&self) -> String {
        format!("Round {}/{}", self.round, self.max_rounds)
    }
}
