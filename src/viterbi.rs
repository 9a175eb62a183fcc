/*! Hard decision Viterbi decoder for the rate 1/2, K=5 code.

Depuncturing happens inside the decoder: bits removed by the schedule
become erasures that cost nothing on any branch, so the path metric
only counts disagreements with bits that were actually received.

The decoder never rejects its input. It always returns the maximum
likelihood data block plus the residual path cost; whether the result
is usable is for the caller (CRC, voice decoder) to judge.
*/
use crate::convolutional::{G1, G2};
use crate::puncture::{get_bit, put_bit};

const NUM_STATES: usize = 16;
const FLUSH_BITS: usize = 4;
const INF: u32 = u32::MAX / 2;

/// Viterbi decoder. Holds its trellis history between calls to avoid
/// re-allocating for every frame.
#[derive(Default)]
pub struct Viterbi {
    history: Vec<u16>,
}

impl Viterbi {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a punctured block into `output`, reinserting erasures
    /// according to `pattern`. Returns the path cost: the number of
    /// received bits that disagree with the decoded codeword.
    pub fn decode_punctured(&mut self, input: &[u8], output: &mut [u8], pattern: &[bool]) -> u32 {
        let steps = output.len() * 8 + FLUSH_BITS;
        self.history.clear();
        self.history.resize(steps, 0);

        let mut metrics = [INF; NUM_STATES];
        metrics[0] = 0; // the encoder starts zeroed

        let mut in_pos = 0;
        let mut sched = 0;
        for t in 0..steps {
            let mut branch_bits = [None; 2];
            for slot in branch_bits.iter_mut() {
                if pattern[sched % pattern.len()] {
                    *slot = Some(get_bit(input, in_pos));
                    in_pos += 1;
                }
                sched += 1;
            }

            let mut next = [INF; NUM_STATES];
            let mut decisions: u16 = 0;
            for (s, m) in metrics.iter().enumerate() {
                if *m >= INF {
                    continue;
                }
                for u in 0..2usize {
                    let window = ((s << 1) | u) & 0x1F;
                    let o1 = ((window as u8 & G1).count_ones() & 1) as u8;
                    let o2 = ((window as u8 & G2).count_ones() & 1) as u8;
                    let cost = branch_cost(branch_bits[0], o1) + branch_cost(branch_bits[1], o2);
                    let ns = window & 0xF;
                    let metric = *m + cost;
                    if metric < next[ns] {
                        next[ns] = metric;
                        if s & 0x8 != 0 {
                            decisions |= 1 << ns;
                        } else {
                            decisions &= !(1 << ns);
                        }
                    }
                }
            }
            metrics = next;
            self.history[t] = decisions;
        }

        // The flush bits force the encoder back to state zero, so
        // that is where the traceback starts.
        let cost = metrics[0];
        let mut state = 0usize;
        for t in (0..steps).rev() {
            if t < output.len() * 8 {
                put_bit(output, t, (state & 1) as u8);
            }
            let decision = (self.history[t] >> state) & 1;
            state = (state >> 1) | ((decision as usize) << 3);
        }
        cost
    }
}

fn branch_cost(received: Option<u8>, expected: u8) -> u32 {
    match received {
        Some(bit) => u32::from(bit ^ expected),
        None => 0,
    }
}
