fn main() {
    agentctl_hook::main_for(agentctl_hook::Kind::Finished);
}
